//! Error types for the phone bridge

use thiserror::Error;

use crate::stack::StackStatus;

/// Result type for phone bridge operations
pub type PhoneResult<T> = Result<T, PhoneError>;

/// Errors that can occur in the phone bridge
#[derive(Debug, Error)]
pub enum PhoneError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Operation attempted in the wrong state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Argument rejected before reaching the stack
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Call not found
    #[error("Call not found: {call_id}")]
    CallNotFound { call_id: String },

    /// Account not found
    #[error("Account not found: {account_id}")]
    AccountNotFound { account_id: String },

    /// Device not found or not usable for the requested operation
    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    /// The native stack rejected a call
    #[error("Stack error {status}: {message}")]
    Stack { status: StackStatus, message: String },

    /// The worker queue no longer accepts tasks
    #[error("Worker queue is shutting down")]
    ShuttingDown,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PhoneError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a stack error from a native status and its resolved text
    pub fn stack(status: StackStatus, message: impl Into<String>) -> Self {
        Self::Stack {
            status,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Native status carried by this error, if it came from the stack
    pub fn stack_status(&self) -> Option<StackStatus> {
        match self {
            Self::Stack { status, .. } => Some(*status),
            _ => None,
        }
    }
}
