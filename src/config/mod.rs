use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Lower bound of the randomized pause between pages.
    #[serde(default = "default_delay_min_ms")]
    pub delay_min_ms: u64,

    #[serde(default = "default_delay_max_ms")]
    pub delay_max_ms: u64,

    /// Extra attempts for a page that failed transiently (429, 5xx, network).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Crawl configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlConfig {
    #[serde(default = "default_page_count")]
    pub page_count: u32,

    /// Keyword-search pages per subject; 0 skips related posts.
    #[serde(default)]
    pub related_pages: u32,

    /// Subjects crawled at the same time. Pages within one subject stay sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Scoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    #[serde(default = "default_margin")]
    pub margin: f64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://m.weibo.cn".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_delay_min_ms() -> u64 {
    2000
}
fn default_delay_max_ms() -> u64 {
    4000
}
fn default_max_retries() -> u32 {
    2
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}
fn default_page_count() -> u32 {
    5
}
fn default_concurrency() -> usize {
    2
}
fn default_margin() -> f64 {
    0.1
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            delay_min_ms: default_delay_min_ms(),
            delay_max_ms: default_delay_max_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            page_count: default_page_count(),
            related_pages: 0,
            concurrency: default_concurrency(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            margin: default_margin(),
        }
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
            .add_source(config::Environment::with_prefix("PULSE").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            warn!("Config unreadable ({}), using defaults", e);
            AppConfig::default()
        });
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    /// Reject settings that would hammer the upstream or break scoring.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scraper;
        if s.delay_min_ms == 0 {
            bail!("scraper.delay_min_ms must be > 0; the inter-page pause cannot be disabled");
        }
        if s.delay_max_ms < s.delay_min_ms {
            bail!(
                "scraper.delay_max_ms ({}) is below delay_min_ms ({})",
                s.delay_max_ms,
                s.delay_min_ms
            );
        }
        if self.crawl.concurrency == 0 {
            bail!("crawl.concurrency must be at least 1");
        }
        let m = self.scoring.margin;
        if !(0.0..1.0).contains(&m) {
            bail!("scoring.margin must lie in [0, 1), got {}", m);
        }
        Ok(())
    }
}
