// src/config/mod.rs
//! Runtime configuration.
//!
//! Resolution order for the file: `--config`, then `$BILLWATCH_CONFIG`, then
//! `config/billwatch.toml`. A missing default file means built-in defaults;
//! an explicit path that does not exist is an error. Secrets never live in the
//! file; they come from `CONGRESS_API_KEY` and `X_USER_ACCESS_TOKEN`.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bill::{congress_for_year, ChamberType};

pub const ENV_CONFIG_PATH: &str = "BILLWATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/billwatch.toml";
pub const ENV_CONGRESS_API_KEY: &str = "CONGRESS_API_KEY";
pub const ENV_X_TOKEN: &str = "X_USER_ACCESS_TOKEN";

fn default_base_url() -> String {
    "https://api.congress.gov/v3".into()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_max_attempts() -> u8 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_page_size() -> u32 {
    250
}
fn default_true() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    600
}
fn default_lookback_days() -> u32 {
    3
}
fn default_max_pages() -> u32 {
    20
}
fn default_max_catch_up_secs() -> u64 {
    900
}
fn default_fetch_concurrency() -> usize {
    4
}
fn default_chambers() -> Vec<String> {
    ChamberType::STANDARD
        .iter()
        .map(|c| c.code().to_string())
        .collect()
}
fn default_range_step() -> u32 {
    1
}
fn default_range_span() -> u32 {
    50
}
fn default_range_start() -> u32 {
    1
}
fn default_max_misses() -> u32 {
    5
}
fn default_store_path() -> PathBuf {
    PathBuf::from("data/billwatch.sqlite")
}
fn default_x_base_url() -> String {
    "https://api.x.com".into()
}
fn default_cooldown_secs() -> u64 {
    3 * 3600
}
fn default_publish_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u8 {
    3
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/summaries")
}
fn default_archive_dir() -> Option<PathBuf> {
    Some(PathBuf::from("data/archive"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongressConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Congress to watch; `None` derives it from today's date.
    #[serde(default)]
    pub congress: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    #[serde(default = "default_backoff_ms")]
    pub backoff_base_ms: u64,
    /// Listing page size (the API caps it at 250).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Pull action history when a detail record lacks a typed latest action.
    #[serde(default = "default_true")]
    pub enrich_actions: bool,
}

impl Default for CongressConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            congress: None,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_ms(),
            page_size: default_page_size(),
            enrich_actions: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanStrategy {
    /// Listing sorted by update date.
    #[default]
    Listing,
    /// Number probing above each chamber's high-water mark.
    Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub strategy: ScanStrategy,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_catch_up_secs")]
    pub max_catch_up_secs: u64,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Chamber codes probed by the range strategy.
    #[serde(default = "default_chambers")]
    pub chambers: Vec<String>,
    #[serde(default = "default_range_step")]
    pub range_step: u32,
    /// Numbers probed per chamber and cycle.
    #[serde(default = "default_range_span")]
    pub range_span: u32,
    /// First number probed when nothing is recorded for a chamber yet.
    #[serde(default = "default_range_start")]
    pub range_start: u32,
    #[serde(default = "default_max_misses")]
    pub max_consecutive_misses: u32,
    /// Run a catch-up pass before the first `watch` interval.
    #[serde(default = "default_true")]
    pub catch_up_on_start: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            strategy: ScanStrategy::default(),
            interval_secs: default_interval_secs(),
            lookback_days: default_lookback_days(),
            max_pages: default_max_pages(),
            max_catch_up_secs: default_max_catch_up_secs(),
            fetch_concurrency: default_fetch_concurrency(),
            chambers: default_chambers(),
            range_step: default_range_step(),
            range_span: default_range_span(),
            range_start: default_range_start(),
            max_consecutive_misses: default_max_misses(),
            catch_up_on_start: true,
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_catch_up(&self) -> Duration {
        Duration::from_secs(self.max_catch_up_secs)
    }

    /// Configured chambers in hand-off order, duplicates dropped.
    pub fn chamber_types(&self) -> Vec<ChamberType> {
        let mut out: Vec<ChamberType> = Vec::new();
        for raw in &self.chambers {
            let c = ChamberType::parse(raw);
            if !out.contains(&c) {
                out.push(c);
            }
        }
        out.sort_by_key(ChamberType::sort_rank);
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Post for real; otherwise the dry-run publisher is used.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_x_base_url")]
    pub x_base_url: String,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_publish_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            x_base_url: default_x_base_url(),
            cooldown_secs: default_cooldown_secs(),
            timeout_secs: default_publish_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CardFormat {
    /// Uploadable to X.
    #[default]
    Png,
    /// Layout only; X rejects it.
    Svg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub format: CardFormat,
    /// Posted cards move to `<archive_dir>/YYYY-MM-DD/`; kept in place when unset.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: default_output_dir(),
            format: CardFormat::default(),
            archive_dir: default_archive_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    /// e.g. `127.0.0.1:9184`; no listener when unset.
    #[serde(default)]
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub congress: CongressConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s).context("parsing billwatch config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    /// Explicit path, then `$BILLWATCH_CONFIG`, then the default file (optional).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from_file(p);
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from_file(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_file(&default);
        }
        let mut cfg = Self::default();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Clamp values that would stall or spin the service.
    pub fn sanitize(&mut self) {
        self.congress.base_url = self.congress.base_url.trim_end_matches('/').to_string();
        self.congress.timeout_secs = self.congress.timeout_secs.max(1);
        self.congress.max_attempts = self.congress.max_attempts.max(1);
        self.congress.page_size = self.congress.page_size.clamp(1, 250);
        if self.congress.congress == Some(0) {
            self.congress.congress = None;
        }

        self.scan.interval_secs = self.scan.interval_secs.max(1);
        self.scan.max_pages = self.scan.max_pages.max(1);
        self.scan.fetch_concurrency = self.scan.fetch_concurrency.max(1);
        self.scan.range_step = self.scan.range_step.max(1);
        self.scan.range_span = self.scan.range_span.max(1);
        self.scan.range_start = self.scan.range_start.max(1);
        if self.scan.chambers.iter().all(|c| c.trim().is_empty()) {
            self.scan.chambers = default_chambers();
        }

        self.publish.x_base_url = self.publish.x_base_url.trim_end_matches('/').to_string();
        self.publish.timeout_secs = self.publish.timeout_secs.max(1);
        self.publish.max_retries = self.publish.max_retries.max(1);
    }

    /// Congress being watched: configured, else derived from today's date.
    pub fn current_congress(&self) -> u32 {
        use chrono::Datelike;
        self.congress
            .congress
            .unwrap_or_else(|| congress_for_year(chrono::Utc::now().year()))
    }

    pub fn congress_api_key() -> Result<String> {
        std::env::var(ENV_CONGRESS_API_KEY)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("Missing {ENV_CONGRESS_API_KEY} env var"))
    }

    pub fn x_access_token() -> Result<String> {
        std::env::var(ENV_X_TOKEN)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("Missing {ENV_X_TOKEN} env var"))
    }
}
