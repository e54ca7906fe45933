use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call exceeded deadline of {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode store payload: {0}")]
    Decode(String),
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// True when the failure says nothing about the data, only that the store
    /// could not be reached in time.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}
