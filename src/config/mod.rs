pub mod catalog;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub use self::catalog::SourceSpec;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Per-source overrides keyed by catalog name.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceOverride>,
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Additional attempts after the first failed request.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before retry `n` is `n * retry_base_ms`.
    #[serde(default = "default_request_retry_base_ms")]
    pub retry_base_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Duckdb,
    Postgrest,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// REST endpoint root, e.g. `https://<project>.supabase.co`.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// REST table receiving run summaries; disabled when unset.
    #[serde(default)]
    pub run_log_table: Option<String>,

    /// Column ordering "most recent record" in stats queries on the REST store.
    #[serde(default = "default_recency_column")]
    pub recency_column: String,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Pause between two successful windows of a sweep.
    #[serde(default = "default_window_delay_ms")]
    pub window_delay_ms: u64,

    /// Attempts per window before it is skipped.
    #[serde(default = "default_page_attempts")]
    pub page_attempts: u32,

    #[serde(default = "default_page_retry_base_ms")]
    pub page_retry_base_ms: u64,

    /// Pause between two store batches.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

/// Optional tweaks applied on top of a catalog entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourceOverride {
    pub enabled: Option<bool>,
    pub interval_minutes: Option<u64>,
    pub batch_size: Option<usize>,
    /// `"HH:MM"`
    pub window_start: Option<String>,
    /// `"HH:MM"`
    pub window_end: Option<String>,
    pub table: Option<String>,
    pub snapshot_path: Option<PathBuf>,
    pub window_delay_ms: Option<u64>,
    pub batch_delay_ms: Option<u64>,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_request_retry_base_ms() -> u64 {
    3000
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/market_feed.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_recency_column() -> String {
    "created_at".to_string()
}
fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}
fn default_window_delay_ms() -> u64 {
    3000
}
fn default_page_attempts() -> u32 {
    3
}
fn default_page_retry_base_ms() -> u64 {
    2000
}
fn default_batch_delay_ms() -> u64 {
    200
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_request_retry_base_ms(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            db_path: default_db_path(),
            run_migrations: true,
            url: None,
            api_key: None,
            run_log_table: None,
            recency_column: default_recency_column(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            window_delay_ms: default_window_delay_ms(),
            page_attempts: default_page_attempts(),
            page_retry_base_ms: default_page_retry_base_ms(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn window_delay(&self) -> Duration {
        Duration::from_millis(self.window_delay_ms)
    }

    pub fn page_retry_base(&self) -> Duration {
        Duration::from_millis(self.page_retry_base_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("MARKET_FEED").separator("__"))
            // Shorthand credentials, as usually found in a deployment's .env
            .set_override_option("store.url", std::env::var("STORE_URL").ok())?
            .set_override_option("store.api_key", std::env::var("STORE_API_KEY").ok())?
            .build()
            .context("Failed to assemble configuration")?;

        cfg.try_deserialize().context("Invalid configuration")
    }

    /// Catalog entries with overrides applied, restricted to `only` when
    /// non-empty, otherwise to the enabled ones.
    pub fn sources(&self, only: &[String]) -> Result<Vec<SourceSpec>> {
        for name in only {
            if catalog::builtin().iter().all(|s| &s.name != name) {
                anyhow::bail!("Unknown source '{}'", name);
            }
        }

        let mut selected = Vec::new();
        for mut spec in catalog::builtin() {
            if let Some(ov) = self.sources.get(&spec.name) {
                spec.apply(ov)
                    .with_context(|| format!("Invalid override for source '{}'", spec.name))?;
            }
            let wanted = if only.is_empty() {
                spec.enabled
            } else {
                only.contains(&spec.name)
            };
            if wanted {
                selected.push(spec);
            }
        }
        Ok(selected)
    }
}
