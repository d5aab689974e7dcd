//! Error types for the runtime system

use crossbeam_channel::{RecvError, SendError};
use std::any::TypeId;

/// Error type for wiring operations
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Type mismatch: {from_node}.{from_port} ({from_type:?}) -> {to_node}.{to_port} ({to_type:?})")]
    TypeMismatch {
        from_node: String,
        from_port: String,
        from_type: TypeId,
        to_node: String,
        to_port: String,
        to_type: TypeId,
    },

    #[error("Stage '{0}' not found")]
    NodeNotFound(String),

    #[error("Stage with name '{0}' already exists")]
    DuplicateNode(String),

    #[error("Port '{port}' not found on stage '{node}'")]
    PortNotFound { node: String, port: String },

    #[error("{0}")]
    DuplicateConnection(String),
}

/// Error type for a single stage iteration
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Failed to receive from input channel: {0}")]
    RecvError(#[from] RecvError),

    #[error("Failed to send to output channel: {0}")]
    SendError(String),

    #[error("Transport fault: {0}")]
    Transport(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stage-specific error: {0}")]
    NodeError(String),

    #[error("Shutdown signal received")]
    Shutdown,
}

impl<T> From<SendError<T>> for WorkError {
    fn from(e: SendError<T>) -> Self {
        WorkError::SendError(format!("{}", e))
    }
}

/// Result type for work functions
pub type WorkResult<T = ()> = Result<T, WorkError>;

/// Error type for building and running a pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Connection(#[from] Box<ConnectionError>),

    #[error("Payload type {0:?} not registered. Call register_type::<T>() before building the pipeline")]
    UnregisteredType(TypeId),

    #[error("Failed to spawn thread for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    #[error("Runtime error: {0}")]
    Runtime(String),
}
