use tracing::{debug, info, warn};

use crate::binding::{Diagnostics, InitRequest, SimulationBinding};
use crate::buffers::{ActionSpace, Actions, BufferSet};
use crate::config::EnvConfig;
use crate::counter::InstanceCounter;
use crate::error::{BindingError, EnvError, Result};
use crate::telemetry::{Connector, Telemetry, WsConnector};

// =============================================================================
// Lifecycle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    Stepping,
    Closed,
}

pub struct StepResult<'a> {
    pub observations: &'a [f32],
    pub rewards: &'a [f32],
    pub terminals: &'a [u8],
    pub truncations: &'a [u8],
    /// One aggregated record on log ticks, empty otherwise.
    pub infos: Vec<Diagnostics>,
}

// =============================================================================
// Vectorized Environment
// =============================================================================

/// Drives `num_envs` emulator instances through one binding.
///
/// Single-threaded by contract: all parallelism across instances lives in
/// the binding, and one controller is owned by one worker.
pub struct VecEnv<B: SimulationBinding> {
    env_id: u64,
    config: EnvConfig,
    state: Lifecycle,
    tick: u64,
    buffers: BufferSet,
    binding: Option<B>,
    telemetry: Option<Telemetry>,
    connector: Option<Box<dyn Connector>>,
}

impl<B: SimulationBinding> VecEnv<B> {
    /// Allocates the controller id and the buffers. Nothing native is
    /// touched until [`VecEnv::initialize`].
    pub fn new(config: EnvConfig, counter: &InstanceCounter) -> Self {
        let env_id = counter.allocate();
        let buffers = BufferSet::new(config.buffer_spec());
        Self {
            env_id,
            config,
            state: Lifecycle::Uninitialized,
            tick: 0,
            buffers,
            binding: None,
            telemetry: None,
            connector: None,
        }
    }

    /// Overrides the collector transport used when streaming is enabled.
    pub fn with_connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// `new` followed by `initialize`.
    pub fn make(config: EnvConfig, counter: &InstanceCounter, seed: u64) -> Result<Self> {
        let mut env = Self::new(config, counter);
        env.initialize(seed)?;
        Ok(env)
    }

    pub fn initialize(&mut self, seed: u64) -> Result<()> {
        if self.state != Lifecycle::Uninitialized {
            return Err(EnvError::InvalidState {
                op: "initialize",
                state: self.state,
            });
        }
        self.config.validate()?;

        let num_agents = self.config.num_envs;
        let mut binding = B::init(InitRequest {
            config: &self.config,
            num_agents,
            seed,
            buffers: self.buffers.binding_view(),
        })
        .map_err(|e| match e {
            BindingError::Config(msg) => EnvError::Config(msg),
            other => EnvError::Binding(other),
        })?;

        if binding.num_agents() != num_agents {
            let got = binding.num_agents();
            binding.close();
            return Err(EnvError::Config(format!(
                "binding started {got} instances, expected {num_agents}"
            )));
        }
        self.binding = Some(binding);

        if self.config.stream.enabled {
            let connector = self
                .connector
                .take()
                .unwrap_or_else(|| Box::new(WsConnector::from_config(&self.config.stream)));
            self.telemetry = Some(Telemetry::start(
                &self.config.stream,
                self.env_id,
                num_agents,
                connector,
            ));
        }

        self.state = Lifecycle::Ready;
        info!(
            env_id = self.env_id,
            num_agents,
            rom = %self.config.rom_path.display(),
            streaming = self.config.stream.enabled,
            "environment initialized"
        );
        Ok(())
    }

    fn require_ready(&self, op: &'static str) -> Result<()> {
        match self.state {
            Lifecycle::Ready => Ok(()),
            state => Err(EnvError::InvalidState { op, state }),
        }
    }

    pub fn reset(&mut self, seed: Option<u64>) -> Result<(&[f32], Vec<Diagnostics>)> {
        self.require_ready("reset")?;
        let binding = self.binding.as_mut().ok_or(EnvError::InvalidState {
            op: "reset",
            state: self.state,
        })?;
        self.tick = 0;
        binding.reset(
            self.buffers.binding_view(),
            seed.unwrap_or(0),
            self.config.reset_mode(),
        )?;
        Ok((self.buffers.observations(), Vec::new()))
    }

    pub fn step<'a>(&mut self, actions: impl Into<Actions<'a>>) -> Result<StepResult<'_>> {
        self.require_ready("step")?;
        self.buffers.write_actions(actions.into())?;

        self.state = Lifecycle::Stepping;
        let advanced = self.advance();
        self.state = Lifecycle::Ready;
        let infos = advanced?;

        Ok(StepResult {
            observations: self.buffers.observations(),
            rewards: self.buffers.rewards(),
            terminals: self.buffers.terminals(),
            truncations: self.buffers.truncations(),
            infos,
        })
    }

    fn advance(&mut self) -> Result<Vec<Diagnostics>> {
        let binding = self.binding.as_mut().ok_or(EnvError::InvalidState {
            op: "step",
            state: self.state,
        })?;

        self.tick += 1;
        binding.step(self.buffers.binding_view())?;

        if let Some(telemetry) = self.telemetry.as_mut() {
            telemetry.record(&binding.positions());
            if let Some(outcome) = telemetry.on_tick(self.tick) {
                debug!(env_id = self.env_id, tick = self.tick, ?outcome, "telemetry flush");
            }
        }

        let mut infos = Vec::new();
        if self.tick.is_multiple_of(self.config.log_interval) {
            match binding.log() {
                Ok(diagnostics) => infos.push(diagnostics),
                Err(e) => warn!(
                    env_id = self.env_id,
                    tick = self.tick,
                    error = %e,
                    "diagnostics unavailable"
                ),
            }
        }
        Ok(infos)
    }

    pub fn render(&mut self, instance: usize) -> Result<()> {
        self.require_ready("render")?;
        let num_agents = self.config.num_envs;
        if instance >= num_agents {
            return Err(EnvError::InvalidIndex {
                index: instance,
                num_agents,
            });
        }
        let binding = self.binding.as_mut().ok_or(EnvError::InvalidState {
            op: "render",
            state: self.state,
        })?;
        binding.render(instance)?;
        Ok(())
    }

    /// Stops streaming and releases the binding. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state == Lifecycle::Closed {
            return;
        }
        if let Some(telemetry) = self.telemetry.as_mut() {
            telemetry.close();
        }
        if let Some(mut binding) = self.binding.take() {
            binding.close();
        }
        self.state = Lifecycle::Closed;
        info!(env_id = self.env_id, tick = self.tick, "environment closed");
    }

    pub fn env_id(&self) -> u64 {
        self.env_id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn num_agents(&self) -> usize {
        self.config.num_envs
    }

    pub fn obs_dim(&self) -> usize {
        self.buffers.spec().obs_dim
    }

    pub fn action_space(&self) -> ActionSpace {
        self.buffers.spec().action_space
    }

    pub fn buffers(&self) -> &BufferSet {
        &self.buffers
    }

    pub fn binding(&self) -> Option<&B> {
        self.binding.as_ref()
    }

    pub fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_ref()
    }
}

impl<B: SimulationBinding> Drop for VecEnv<B> {
    fn drop(&mut self) {
        self.close();
    }
}
