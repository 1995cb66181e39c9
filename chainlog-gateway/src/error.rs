use chainlog_connector::{ConfirmationError, SyncError};
use thiserror::Error;

/// Defines the primary error types for the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Synchronization failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Transaction failed: {0}")]
    Confirmation(#[from] ConfirmationError),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] bincode::error::EncodeError),

    #[error("Deserialization failed: {0}")]
    Deserialization(#[from] bincode::error::DecodeError),
}

/// Helper implementation to convert hex parsing errors into our custom error type.
impl From<hex::FromHexError> for GatewayError {
    fn from(err: hex::FromHexError) -> Self {
        GatewayError::InvalidArgument(format!("Invalid hex payload: {}", err))
    }
}
