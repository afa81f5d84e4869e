//! Configuration file parser for the feed catalog and scheduling knobs.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use crate::types::{FeedId, FeedSpec};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// The file parsed but describes an unusable catalog or schedule.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// RSS endpoint; `rub` and `cat` query parameters are appended per feed.
    pub base_url: String,

    pub schedule: ScheduleConfig,

    pub http: HttpConfig,

    /// Sections to watch, in polling order.
    pub sections: Vec<SectionConfig>,
}

/// Adaptive polling bounds and the global request budget.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub initial_interval_secs: u64,
    /// Wait before retrying a feed whose fetch failed.
    pub error_cooldown_secs: u64,
    /// Entries per page the upstream returns at most.
    pub page_size: usize,
    /// Sleep between two outbound fetches.
    pub inter_request_delay_secs: u64,
    /// Nominal pass duration; longer passes log a warning.
    pub refresh_period_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 600,
            max_interval_secs: 24 * 60 * 60,
            initial_interval_secs: 600,
            error_cooldown_secs: 120,
            page_size: 30,
            inter_request_delay_secs: 12,
            refresh_period_secs: 600,
        }
    }
}

impl ScheduleConfig {
    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_secs(self.inter_request_delay_secs)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("listwatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// One top-level section of the classifieds site.
#[derive(Debug, Clone, Deserialize)]
pub struct SectionConfig {
    pub code: String,
    /// When non-empty, each category is watched as its own feed instead of
    /// the whole section.
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    pub id: u32,
    pub name: String,
}

/// Upper bound for any configured duration: ten years.
const MAX_SCHEDULE_SECS: u64 = 10 * 365 * 24 * 60 * 60;

const DEFAULT_SECTIONS: &[&str] = &[
    "zv", "de", "re", "pr", "au", "mt", "st", "du", "pc", "mo", "fo", "el", "sp", "hu", "vs", "kn",
    "na", "ob", "sl", "os",
];

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://www.bazos.cz/rss.php".to_string(),
            schedule: ScheduleConfig::default(),
            http: HttpConfig::default(),
            sections: DEFAULT_SECTIONS
                .iter()
                .map(|code| SectionConfig {
                    code: (*code).to_string(),
                    categories: Vec::new(),
                })
                .collect(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    ///
    /// The result is not validated; call [`Config::feeds`] to resolve the catalog.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["base_url", "schedule", "http", "sections"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            sections = config.sections.len(),
            base_url = %config.base_url,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Check schedule bounds, section codes and the base URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.schedule;
        for (key, secs) in [
            ("max_interval_secs", s.max_interval_secs),
            ("error_cooldown_secs", s.error_cooldown_secs),
            ("inter_request_delay_secs", s.inter_request_delay_secs),
            ("refresh_period_secs", s.refresh_period_secs),
        ] {
            if secs > MAX_SCHEDULE_SECS {
                return Err(ConfigError::Invalid(format!(
                    "schedule.{key} ({secs}) exceeds the {MAX_SCHEDULE_SECS}s ceiling"
                )));
            }
        }
        if s.min_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.min_interval_secs must be positive".into(),
            ));
        }
        if s.min_interval_secs > s.max_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "schedule.min_interval_secs ({}) exceeds max_interval_secs ({})",
                s.min_interval_secs, s.max_interval_secs
            )));
        }
        if !(s.min_interval_secs..=s.max_interval_secs).contains(&s.initial_interval_secs) {
            return Err(ConfigError::Invalid(format!(
                "schedule.initial_interval_secs ({}) must lie within [{}, {}]",
                s.initial_interval_secs, s.min_interval_secs, s.max_interval_secs
            )));
        }
        if s.page_size == 0 {
            return Err(ConfigError::Invalid(
                "schedule.page_size must be positive".into(),
            ));
        }
        if self.sections.is_empty() {
            return Err(ConfigError::Invalid("no sections configured".into()));
        }
        let mut seen = HashSet::new();
        for section in &self.sections {
            let code = section.code.trim();
            if code.is_empty() {
                return Err(ConfigError::Invalid("section with empty code".into()));
            }
            let ids: Vec<FeedId> = if section.categories.is_empty() {
                vec![FeedId::new(code, None)]
            } else {
                section
                    .categories
                    .iter()
                    .map(|cat| FeedId::new(code, Some(cat.id)))
                    .collect()
            };
            for id in ids {
                if !seen.insert(id.clone()) {
                    return Err(ConfigError::Invalid(format!("duplicate feed '{id}'")));
                }
            }
        }
        self.parsed_base_url().map(|_| ())
    }

    fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url '{}': {e}", self.base_url)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ConfigError::Invalid(format!(
                "base_url scheme '{scheme}' is not http or https"
            ))),
        }
    }

    /// Validate and expand the section catalog into concrete feeds, in
    /// configuration order.
    ///
    /// A section with categories yields one feed per category
    /// (`?rub={code}&cat={id}`); a section without yields a single
    /// section-wide feed (`?rub={code}`).
    pub fn feeds(&self) -> Result<Vec<FeedSpec>, ConfigError> {
        self.validate()?;
        let base = self.parsed_base_url()?;

        let mut feeds = Vec::new();

        for section in &self.sections {
            let code = section.code.trim();
            if section.categories.is_empty() {
                feeds.push(FeedSpec {
                    id: FeedId::new(code, None),
                    url: feed_url(&base, code, None),
                    label: None,
                });
            } else {
                for cat in &section.categories {
                    feeds.push(FeedSpec {
                        id: FeedId::new(code, Some(cat.id)),
                        url: feed_url(&base, code, Some(cat.id)),
                        label: Some(cat.name.clone()),
                    });
                }
            }
        }

        Ok(feeds)
    }
}

fn feed_url(base: &Url, section: &str, category: Option<u32>) -> Url {
    let mut url = base.clone();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("rub", section);
        if let Some(cat) = category {
            query.append_pair("cat", &cat.to_string());
        }
    }
    url
}

// ============================================================================
// Tests
// ============================================================================
