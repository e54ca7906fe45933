use autopilot_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// Kill-switch writes are not best-effort: the caller must learn that the
    /// emergency stop was not recorded.
    #[error("failed to write kill switch record: {0}")]
    KillSwitchWrite(#[source] StoreError),
    #[error("store rejected kill switch record")]
    KillSwitchRejected,
    #[error("failed to encode kill switch record: {0}")]
    KillSwitchEncode(#[from] serde_json::Error),
}
