use thiserror::Error;

use crate::env::Lifecycle;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot {op} while controller is {state:?}")]
    InvalidState { op: &'static str, state: Lifecycle },

    #[error("action shape mismatch: expected {expected} {kind} values, got {got}")]
    ActionShape {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("instance index {index} out of range (num_agents={num_agents})")]
    InvalidIndex { index: usize, num_agents: usize },

    #[error("simulation binding failed: {0}")]
    Binding(#[from] BindingError),
}

/// Errors raised by a [`crate::binding::SimulationBinding`] implementation.
#[derive(Debug, Error)]
pub enum BindingError {
    /// ROM/state missing or rejected by the emulator core.
    #[error("{0}")]
    Config(String),

    #[error("runtime failure: {0}")]
    Runtime(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid collector endpoint {endpoint}: {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("connection closed")]
    Closed,
}

pub type Result<T, E = EnvError> = std::result::Result<T, E>;
