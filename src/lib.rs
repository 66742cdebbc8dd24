pub mod action;
pub mod binding;
pub mod buffers;
pub mod config;
pub mod counter;
pub mod env;
pub mod error;
pub mod telemetry;

pub use action::{Button, key_mask_for};
pub use binding::{Diagnostics, EpisodeLog, InitRequest, Position, ResetMode, SimulationBinding};
pub use buffers::{
    ActionBuffer, ActionSpace, Actions, BindingView, BufferSet, BufferSpec, Extra,
    ObservationLayout, Slot, SlotAction,
};
pub use config::{EnvArgs, EnvConfig, StreamConfig};
pub use counter::{InstanceCounter, RunId};
pub use env::{Lifecycle, StepResult, VecEnv};
pub use error::{BindingError, EnvError, TransportError};
pub use telemetry::{FlushOutcome, FlushStats, StreamState, Telemetry};
