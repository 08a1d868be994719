//! Error types
//!
//! Errors only surface from operations that run outside the audio callback:
//! patching, state restore and queue hand-off. The per-sample path never
//! returns an error; it skips the affected element and logs instead.

use crate::port::{ParamId, PortId};
use thiserror::Error;

/// Errors raised by module, host and queue operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// A parameter id has no definition on the module
    #[error("unknown parameter id {0}")]
    UnknownParam(ParamId),

    /// A port id is out of range for the module
    #[error("unknown {direction} port {port}")]
    UnknownPort {
        /// "input" or "output"
        direction: &'static str,
        /// Offending port id
        port: PortId,
    },

    /// The module handle does not refer to a live module
    #[error("module not found")]
    UnknownModule,

    /// An input already has a cable attached
    #[error("input port {0} is already connected")]
    PortAlreadyConnected(PortId),

    /// The cable handle does not refer to a live cable
    #[error("invalid cable")]
    InvalidCable,

    /// The bounded hand-off queue has no free slot
    #[error("queue is full")]
    QueueFull,

    /// No wavetable with this index or name exists in the catalog
    #[error("unknown wavetable '{0}'")]
    UnknownWavetable(String),

    /// Persisted module state could not be decoded
    #[error("invalid module state: {0}")]
    State(#[from] serde_json::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = core::result::Result<T, EngineError>;
