use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Result, anyhow};
use autopilot_ledger::{DEFAULT_NAMESPACE, LedgerConfig, RetryPolicy};
use autopilot_router::{
    ActionCategory, DEFAULT_KILL_SWITCH_SCOPE, DEFAULT_TARGET, ExecutionMode, ExecutionScope,
    KillSwitchFailurePolicy, RouteEntry, RouterConfig, StaticTargetRegistry, Target,
};
use autopilot_store::HttpStoreConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_SOURCE_AGENT: &str = "autopilot";
const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub store_url: Option<String>,
    pub store_token: Option<String>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct AutopilotConfig {
    pub store: StoreSettings,
    pub ledger: LedgerSettings,
    pub router: RouterSettings,
    pub targets: Vec<Target>,
    pub routes: Vec<RouteEntry>,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub url: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
    pub source_agent: String,
}

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub namespace: String,
    pub default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_percent: u8,
    pub restore_limit: usize,
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub mode: ExecutionMode,
    pub scope: ExecutionScope,
    pub kill_switch_on_error: KillSwitchFailurePolicy,
    pub kill_switch_scope: String,
    pub default_target: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoggingSettings {
    /// Directory for the daily rolling log file. Stderr only when unset.
    pub dir: Option<PathBuf>,
    /// Default filter when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("store url is not configured; set [store].url or AUTOPILOT_STORE_URL")]
    MissingStoreUrl,
    #[error("store url must start with http:// or https://: {0}")]
    InvalidStoreUrl(String),
    #[error("store timeout_ms must be greater than zero")]
    ZeroTimeout,
    #[error("ledger sweep_interval_secs must be greater than zero")]
    ZeroSweepInterval,
    #[error("ledger jitter_percent must be at most 100, got {0}")]
    JitterOutOfRange(u8),
    #[error("ledger max_delay_ms must not be lower than base_delay_ms")]
    InvalidBackoff,
    #[error("target id cannot be empty")]
    EmptyTargetId,
    #[error("category {0} is routed more than once")]
    DuplicateRoute(ActionCategory),
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            source_agent: DEFAULT_SOURCE_AGENT.to_string(),
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        let defaults = LedgerConfig::default();
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_ttl_secs: defaults.default_ttl.as_secs(),
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
            max_retries: defaults.retry.max_retries,
            base_delay_ms: duration_ms(defaults.retry.base_delay),
            max_delay_ms: duration_ms(defaults.retry.max_delay),
            jitter_percent: defaults.retry.jitter_percent,
            restore_limit: defaults.restore_limit,
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            scope: ExecutionScope::default(),
            kill_switch_on_error: KillSwitchFailurePolicy::default(),
            kill_switch_scope: DEFAULT_KILL_SWITCH_SCOPE.to_string(),
            default_target: DEFAULT_TARGET.to_string(),
        }
    }
}

impl AutopilotConfig {
    pub fn load(config_path: &Path, cli: &CliOverrides) -> Result<Self> {
        let config = Self::load_unvalidated(config_path, cli)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_unvalidated(config_path: &Path, cli: &CliOverrides) -> Result<Self> {
        let mut config = if config_path.exists() {
            let text = std::fs::read_to_string(config_path).map_err(|error| {
                anyhow!(
                    "failed to read autopilot config {}: {error}",
                    config_path.display()
                )
            })?;
            let persisted: PersistedConfig = toml::from_str(&text).map_err(|error| {
                anyhow!(
                    "failed to parse autopilot config {}: {error}",
                    config_path.display()
                )
            })?;
            persisted.into_runtime()
        } else {
            AutopilotConfig::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli);
        config.normalize_paths();

        Ok(config)
    }

    /// Persist the router mode and scope, leaving every other key in the file
    /// as it was.
    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                anyhow!("failed to create config dir {}: {error}", parent.display())
            })?;
        }

        let mut root = load_toml_root_table(config_path)?;

        {
            let router = ensure_subtable(&mut root, "router");
            router.insert(
                "mode".to_string(),
                toml::Value::String(self.router.mode.to_string()),
            );
            router.insert(
                "scope".to_string(),
                toml::Value::String(self.router.scope.to_string()),
            );
        }

        let text = toml::to_string_pretty(&toml::Value::Table(root))
            .map_err(|error| anyhow!("failed to serialize autopilot config: {error}"))?;

        std::fs::write(config_path, text).map_err(|error| {
            anyhow!(
                "failed to write autopilot config {}: {error}",
                config_path.display()
            )
        })?;

        Ok(())
    }

    pub fn validate_with_error(&self) -> std::result::Result<(), ConfigValidationError> {
        let url = self.store.url.trim();
        if url.is_empty() {
            return Err(ConfigValidationError::MissingStoreUrl);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigValidationError::InvalidStoreUrl(url.to_string()));
        }
        if self.store.timeout_ms == 0 {
            return Err(ConfigValidationError::ZeroTimeout);
        }

        if self.ledger.sweep_interval_secs == 0 {
            return Err(ConfigValidationError::ZeroSweepInterval);
        }
        if self.ledger.jitter_percent > 100 {
            return Err(ConfigValidationError::JitterOutOfRange(
                self.ledger.jitter_percent,
            ));
        }
        if self.ledger.max_delay_ms < self.ledger.base_delay_ms {
            return Err(ConfigValidationError::InvalidBackoff);
        }

        if self.targets.iter().any(|target| target.id.trim().is_empty()) {
            return Err(ConfigValidationError::EmptyTargetId);
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            if !seen.insert(route.category) {
                return Err(ConfigValidationError::DuplicateRoute(route.category));
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_with_error().map_err(anyhow::Error::new)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    pub fn store_config(&self) -> HttpStoreConfig {
        let config = HttpStoreConfig::new(self.store.url.clone()).with_timeout(self.call_timeout());
        match &self.store.token {
            Some(token) => config.with_token(token.clone()),
            None => config,
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            namespace: self.ledger.namespace.clone(),
            default_ttl: Duration::from_secs(self.ledger.default_ttl_secs),
            sweep_interval: Duration::from_secs(self.ledger.sweep_interval_secs),
            call_timeout: self.call_timeout(),
            source_agent: self.store.source_agent.clone(),
            restore_limit: self.ledger.restore_limit,
            retry: RetryPolicy {
                max_retries: self.ledger.max_retries,
                base_delay: Duration::from_millis(self.ledger.base_delay_ms),
                max_delay: Duration::from_millis(self.ledger.max_delay_ms),
                jitter_percent: self.ledger.jitter_percent,
            },
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            mode: self.router.mode,
            scope: self.router.scope,
            kill_switch_scope: self.router.kill_switch_scope.clone(),
            kill_switch_policy: self.router.kill_switch_on_error,
            call_timeout: self.call_timeout(),
            source_agent: self.store.source_agent.clone(),
            default_target: self.router.default_target.clone(),
        }
    }

    pub fn target_registry(&self) -> StaticTargetRegistry {
        StaticTargetRegistry::new(self.targets.clone(), self.routes.clone())
    }

    fn apply_env_overrides(&mut self) {
        if self.store.url.trim().is_empty() {
            if let Ok(value) = std::env::var("AUTOPILOT_STORE_URL") {
                self.store.url = value;
            } else if let Ok(value) = std::env::var("MEMORY_GATEWAY_URL") {
                self.store.url = value;
            }
        }

        if self.store.token.is_none()
            && let Ok(value) = std::env::var("AUTOPILOT_STORE_TOKEN")
            && !value.trim().is_empty()
        {
            self.store.token = Some(value);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        if let Some(url) = &cli.store_url {
            self.store.url = url.clone();
        }
        if let Some(token) = &cli.store_token {
            self.store.token = Some(token.clone());
        }
        if let Some(dir) = &cli.log_dir {
            self.logging.dir = Some(dir.clone());
        }
    }

    fn normalize_paths(&mut self) {
        self.logging.dir = self.logging.dir.as_deref().map(expand_tilde_path);
    }
}

pub fn default_config_path() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        return home.join(".autopilot").join("autopilot.toml");
    }
    PathBuf::from(".autopilot/autopilot.toml")
}

fn load_toml_root_table(config_path: &Path) -> Result<toml::value::Table> {
    if !config_path.exists() {
        return Ok(toml::value::Table::new());
    }

    let text = std::fs::read_to_string(config_path).map_err(|error| {
        anyhow!(
            "failed to read autopilot config {}: {error}",
            config_path.display()
        )
    })?;

    let value: toml::Value = toml::from_str(&text).map_err(|error| {
        anyhow!(
            "failed to parse autopilot config {}: {error}",
            config_path.display()
        )
    })?;

    match value {
        toml::Value::Table(table) => Ok(table),
        _ => Err(anyhow!(
            "failed to parse autopilot config {}: top-level value must be a TOML table",
            config_path.display()
        )),
    }
}

fn ensure_subtable<'a>(table: &'a mut toml::value::Table, key: &str) -> &'a mut toml::value::Table {
    if !matches!(table.get(key), Some(toml::Value::Table(_))) {
        table.insert(
            key.to_string(),
            toml::Value::Table(toml::value::Table::new()),
        );
    }

    match table.get_mut(key) {
        Some(toml::Value::Table(subtable)) => subtable,
        _ => unreachable!("subtable just inserted"),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct PersistedConfig {
    #[serde(default)]
    store: PersistedStore,
    #[serde(default)]
    ledger: PersistedLedger,
    #[serde(default)]
    router: PersistedRouter,
    #[serde(default)]
    targets: Vec<Target>,
    #[serde(default)]
    routes: Vec<RouteEntry>,
    #[serde(default)]
    logging: PersistedLogging,
}

impl PersistedConfig {
    fn into_runtime(self) -> AutopilotConfig {
        let store_defaults = StoreSettings::default();
        let ledger_defaults = LedgerSettings::default();
        let router_defaults = RouterSettings::default();

        AutopilotConfig {
            store: StoreSettings {
                url: self.store.url.unwrap_or_default(),
                token: self.store.token.filter(|token| !token.trim().is_empty()),
                timeout_ms: self.store.timeout_ms.unwrap_or(store_defaults.timeout_ms),
                source_agent: self
                    .store
                    .source_agent
                    .unwrap_or(store_defaults.source_agent),
            },
            ledger: LedgerSettings {
                namespace: self.ledger.namespace.unwrap_or(ledger_defaults.namespace),
                default_ttl_secs: self
                    .ledger
                    .default_ttl_secs
                    .unwrap_or(ledger_defaults.default_ttl_secs),
                sweep_interval_secs: self
                    .ledger
                    .sweep_interval_secs
                    .unwrap_or(ledger_defaults.sweep_interval_secs),
                max_retries: self.ledger.max_retries.unwrap_or(ledger_defaults.max_retries),
                base_delay_ms: self
                    .ledger
                    .base_delay_ms
                    .unwrap_or(ledger_defaults.base_delay_ms),
                max_delay_ms: self
                    .ledger
                    .max_delay_ms
                    .unwrap_or(ledger_defaults.max_delay_ms),
                jitter_percent: self
                    .ledger
                    .jitter_percent
                    .unwrap_or(ledger_defaults.jitter_percent),
                restore_limit: self
                    .ledger
                    .restore_limit
                    .unwrap_or(ledger_defaults.restore_limit),
            },
            router: RouterSettings {
                mode: self.router.mode.unwrap_or_default(),
                scope: self.router.scope.unwrap_or_default(),
                kill_switch_on_error: self.router.kill_switch_on_error.unwrap_or_default(),
                kill_switch_scope: self
                    .router
                    .kill_switch_scope
                    .unwrap_or(router_defaults.kill_switch_scope),
                default_target: self
                    .router
                    .default_target
                    .unwrap_or(router_defaults.default_target),
            },
            targets: self.targets,
            routes: self.routes,
            logging: LoggingSettings {
                dir: self.logging.dir.map(PathBuf::from),
                filter: self.logging.filter,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct PersistedStore {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    source_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct PersistedLedger {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    default_ttl_secs: Option<u64>,
    #[serde(default)]
    sweep_interval_secs: Option<u64>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    base_delay_ms: Option<u64>,
    #[serde(default)]
    max_delay_ms: Option<u64>,
    #[serde(default)]
    jitter_percent: Option<u8>,
    #[serde(default)]
    restore_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct PersistedRouter {
    #[serde(default)]
    mode: Option<ExecutionMode>,
    #[serde(default)]
    scope: Option<ExecutionScope>,
    #[serde(default)]
    kill_switch_on_error: Option<KillSwitchFailurePolicy>,
    #[serde(default)]
    kill_switch_scope: Option<String>,
    #[serde(default)]
    default_target: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct PersistedLogging {
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    filter: Option<String>,
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn expand_tilde_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }

    if path_str == "~"
        && let Some(home) = dirs::home_dir()
    {
        return home;
    }

    path.to_path_buf()
}
