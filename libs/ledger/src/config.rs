use std::time::Duration;

use autopilot_store::DEFAULT_CALL_TIMEOUT;

use crate::RetryPolicy;

pub const DEFAULT_NAMESPACE: &str = "autopilot/ledger";

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Store scope that holds this ledger's entries.
    pub namespace: String,
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
    pub call_timeout: Duration,
    pub source_agent: String,
    /// Upper bound on entries fetched by `restore`.
    pub restore_limit: usize,
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            source_agent: "autopilot".to_string(),
            restore_limit: 1000,
            retry: RetryPolicy::default(),
        }
    }
}
