//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] ledgerly_storage::StorageError),

    #[error("API error: {0}")]
    Api(#[from] ledgerly_api::ApiError),

    #[error("Configuration error: {0}")]
    Config(String),
}
