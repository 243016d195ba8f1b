//! Configuration file parser for `feedcast.toml`.
//!
//! Loading is two steps. [`Config::load`] reads and parses the TOML file, then
//! [`Config::validate`] resolves the bot token and every category's sources
//! into an immutable [`Settings`] value. Both steps fail with [`ConfigError`],
//! which is fatal at startup: nothing is dispatched from a config that did not
//! validate.
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::delivery::DEFAULT_API_BASE_URL;
use crate::feed::{load_source_list, FeedCategory, FeedSource, SourceListError};
use crate::format::ParseMode;
use crate::retry::{Backoff, RetryPolicy};
use crate::window::{WindowPolicy, DEFAULT_WINDOW_HOURS, MAX_WINDOW_HOURS};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds [`Config::MAX_FILE_SIZE`].
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Parsed fine but cannot be run.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    SourceList(#[from] SourceListError),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration as written in the file.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The custom Debug impl masks `bot_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Telegram bot token. `--bot-token` / `FEEDCAST_BOT_TOKEN` take precedence.
    pub bot_token: Option<String>,

    /// Length of the trailing time window in hours.
    pub window_hours: u32,

    /// Truncate both window bounds to the top of the hour.
    pub align_to_hour: bool,

    /// Markup mode used for formatting and declared to the Bot API.
    pub parse_mode: ParseMode,

    /// Sort each category's batch oldest first instead of source order.
    pub sort_by_time: bool,

    pub disable_link_preview: bool,

    pub fetch: FetchConfig,

    pub delivery: DeliveryConfig,

    pub categories: Vec<CategoryConfig>,

    /// Directory relative source list paths are resolved against.
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Feeds fetched at once within one category.
    pub concurrency: usize,
    pub max_feed_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            concurrency: 4,
            max_feed_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_secs: 3,
        }
    }
}

/// One `[[categories]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    /// Destination chat id. A missing key reads as 0 and fails validation.
    #[serde(default)]
    pub channel_id: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// JSON source list, relative to the config file's directory.
    #[serde(default)]
    pub sources: Option<PathBuf>,
    /// Inline sources, appended after those from `sources`.
    #[serde(default)]
    pub feeds: Vec<FeedSource>,
}

fn default_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: None,
            window_hours: DEFAULT_WINDOW_HOURS,
            align_to_hour: false,
            parse_mode: ParseMode::default(),
            sort_by_time: false,
            disable_link_preview: false,
            fetch: FetchConfig::default(),
            delivery: DeliveryConfig::default(),
            categories: Vec::new(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("window_hours", &self.window_hours)
            .field("align_to_hour", &self.align_to_hour)
            .field("parse_mode", &self.parse_mode)
            .field("sort_by_time", &self.sort_by_time)
            .field("disable_link_preview", &self.disable_link_preview)
            .field("fetch", &self.fetch)
            .field("delivery", &self.delivery)
            .field("categories", &self.categories)
            .finish()
    }
}

/// Validated, immutable run configuration.
#[derive(Debug)]
pub struct Settings {
    pub bot_token: SecretString,
    pub window: WindowPolicy,
    pub parse_mode: ParseMode,
    pub sort_by_time: bool,
    pub disable_link_preview: bool,
    pub fetch: FetchConfig,
    pub delivery: DeliveryConfig,
    /// Categories to run, in configuration order, with sources resolved.
    pub categories: Vec<FeedCategory>,
}

impl Settings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.timeout_secs)
    }

    /// Exponential backoff from one second.
    pub fn fetch_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch.max_retries,
            Backoff::Exponential {
                base: Duration::from_secs(1),
            },
        )
    }

    /// Fixed delay between attempts.
    pub fn delivery_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.delivery.max_retries,
            Backoff::Fixed(Duration::from_secs(self.delivery.retry_delay_secs)),
        )
    }
}

const KNOWN_KEYS: &[&str] = &[
    "bot_token",
    "window_hours",
    "align_to_hour",
    "parse_mode",
    "sort_by_time",
    "disable_link_preview",
    "fetch",
    "delivery",
    "categories",
];
const KNOWN_FETCH_KEYS: &[&str] = &["timeout_secs", "max_retries", "concurrency", "max_feed_bytes"];
const KNOWN_DELIVERY_KEYS: &[&str] = &[
    "api_base_url",
    "timeout_secs",
    "max_retries",
    "retry_delay_secs",
];
const KNOWN_CATEGORY_KEYS: &[&str] = &["name", "channel_id", "enabled", "sources", "feeds"];

impl Config {
    /// Maximum config file size (1 MB).
    pub const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing or unreadable file → `Err(ConfigError::Io)`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warnings
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };

        let meta = std::fs::metadata(path).map_err(io_err)?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path).map_err(io_err)?;
        let mut config = Self::parse(&content)?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        tracing::info!(
            path = %path.display(),
            categories = config.categories.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parses TOML text. Relative source list paths resolve against the
    /// current directory.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }
        Ok(toml::from_str(content)?)
    }

    /// Resolves this config into runnable [`Settings`].
    ///
    /// `token_override` comes from the command line or environment and wins
    /// over `bot_token`. A non-empty `only` restricts the run to the named
    /// categories, which are then run even if disabled in the file.
    pub fn validate(
        self,
        token_override: Option<SecretString>,
        only: &[String],
    ) -> Result<Settings, ConfigError> {
        let bot_token = token_override
            .filter(|t| !t.expose_secret().trim().is_empty())
            .or_else(|| {
                self.bot_token
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(|t| SecretString::from(t.to_string()))
            })
            .ok_or_else(|| {
                ConfigError::Invalid(
                    "bot token missing (set bot_token, --bot-token or FEEDCAST_BOT_TOKEN)"
                        .to_string(),
                )
            })?;

        if self.window_hours == 0 {
            return Err(ConfigError::Invalid(
                "window_hours must be at least 1".to_string(),
            ));
        }
        if self.window_hours > MAX_WINDOW_HOURS {
            return Err(ConfigError::Invalid(format!(
                "window_hours must be at most {}",
                MAX_WINDOW_HOURS
            )));
        }
        if self.fetch.timeout_secs == 0 || self.delivery.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.fetch.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "fetch.concurrency must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            if category.name.trim().is_empty() {
                return Err(ConfigError::Invalid("category with empty name".to_string()));
            }
            if !seen.insert(category.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate category '{}'",
                    category.name
                )));
            }
        }
        for name in only {
            if !seen.contains(name.as_str()) {
                return Err(ConfigError::Invalid(format!("unknown category '{}'", name)));
            }
        }

        let mut categories = Vec::new();
        for category in &self.categories {
            let selected = if only.is_empty() {
                category.enabled
            } else {
                only.contains(&category.name)
            };
            if !selected {
                tracing::debug!(category = %category.name, "Category not selected, skipping");
                continue;
            }
            categories.push(self.resolve_category(category)?);
        }

        if categories.is_empty() {
            return Err(ConfigError::Invalid(
                "no enabled categories to run".to_string(),
            ));
        }

        Ok(Settings {
            bot_token,
            window: WindowPolicy::hours(self.window_hours).aligned_to_hour(self.align_to_hour),
            parse_mode: self.parse_mode,
            sort_by_time: self.sort_by_time,
            disable_link_preview: self.disable_link_preview,
            fetch: self.fetch,
            delivery: self.delivery,
            categories,
        })
    }

    fn resolve_category(&self, category: &CategoryConfig) -> Result<FeedCategory, ConfigError> {
        if category.channel_id == 0 {
            return Err(ConfigError::Invalid(format!(
                "category '{}' has no channel_id",
                category.name
            )));
        }

        let mut sources = match &category.sources {
            Some(path) => load_source_list(&self.base_dir.join(path))?,
            None => Vec::new(),
        };
        for feed in &category.feeds {
            feed.validate()?;
        }
        sources.extend(category.feeds.iter().cloned());

        if sources.is_empty() {
            tracing::warn!(category = %category.name, "Category has no feed sources");
        }

        Ok(FeedCategory {
            name: category.name.clone(),
            channel_id: category.channel_id,
            sources,
        })
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    check_keys(raw, KNOWN_KEYS, None);
    if let Some(toml::Value::Table(fetch)) = raw.get("fetch") {
        check_keys(fetch, KNOWN_FETCH_KEYS, Some("fetch"));
    }
    if let Some(toml::Value::Table(delivery)) = raw.get("delivery") {
        check_keys(delivery, KNOWN_DELIVERY_KEYS, Some("delivery"));
    }
    if let Some(toml::Value::Array(categories)) = raw.get("categories") {
        for table in categories.iter().filter_map(toml::Value::as_table) {
            check_keys(table, KNOWN_CATEGORY_KEYS, Some("categories"));
        }
    }
}

fn check_keys(table: &toml::Table, known: &[&str], section: Option<&str>) {
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            tracing::warn!(
                key = %key,
                section = section.unwrap_or("root"),
                "Unknown key in config file, ignoring"
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_temp(name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("feedcast_config_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        for (file, content) in files {
            std::fs::write(dir.join(file), content).unwrap();
        }
        dir
    }

    const MINIMAL: &str = r#"
bot_token = "123:abc"

[[categories]]
name = "news"
channel_id = -1001

[[categories.feeds]]
title = "Example"
url = "https://example.com/feed.xml"
"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.window_hours, 24);
        assert_eq!(config.parse_mode, ParseMode::Html);
        assert_eq!(config.fetch, FetchConfig::default());
        assert_eq!(config.delivery.api_base_url, "https://api.telegram.org");
        assert_eq!(config.delivery.max_retries, 3);
        assert_eq!(config.delivery.retry_delay_secs, 3);
        assert!(config.categories.is_empty());
    }

    #[test]
    fn test_minimal_config_validates() {
        let settings = Config::parse(MINIMAL).unwrap().validate(None, &[]).unwrap();
        assert_eq!(settings.bot_token.expose_secret(), "123:abc");
        assert_eq!(settings.window, WindowPolicy::default());
        assert_eq!(
            settings.categories,
            vec![FeedCategory {
                name: "news".to_string(),
                channel_id: -1001,
                sources: vec![FeedSource::new(
                    "Example",
                    "https://example.com/feed.xml",
                    false
                )],
            }]
        );
        assert_eq!(settings.delivery_retry(), RetryPolicy::delivery_default());
        assert_eq!(settings.fetch_retry(), RetryPolicy::fetch_default());
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = Path::new("/tmp/feedcast_test_nonexistent_config.toml");
        let err = Config::load(path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = format!("totally_fake_key = 1\n{}", MINIMAL);
        assert!(Config::parse(&content).is_ok());
    }

    #[test]
    fn test_token_override_wins() {
        let settings = Config::parse(MINIMAL)
            .unwrap()
            .validate(Some(SecretString::from("999:cli".to_string())), &[])
            .unwrap();
        assert_eq!(settings.bot_token.expose_secret(), "999:cli");
    }

    #[test]
    fn test_window_hours_upper_bound() {
        let content = format!("window_hours = {}\n{}", u32::MAX, MINIMAL);
        let err = Config::parse(&content)
            .unwrap()
            .validate(None, &[])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("window_hours"));

        let content = format!("window_hours = {}\n{}", MAX_WINDOW_HOURS, MINIMAL);
        let settings = Config::parse(&content).unwrap().validate(None, &[]).unwrap();
        assert!(settings.window.at(chrono::Utc::now()).start < chrono::Utc::now());
    }

    #[test]
    fn test_missing_token_rejected() {
        let content = MINIMAL.replace("bot_token = \"123:abc\"", "bot_token = \"  \"");
        let err = Config::parse(&content)
            .unwrap()
            .validate(None, &[])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("bot token"));
    }

    #[test]
    fn test_zero_channel_rejected() {
        let content = MINIMAL.replace("channel_id = -1001", "");
        let err = Config::parse(&content)
            .unwrap()
            .validate(None, &[])
            .unwrap_err();
        assert!(err.to_string().contains("channel_id"));
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let content = format!(
            "{}\n[[categories]]\nname = \"news\"\nchannel_id = -2\n",
            MINIMAL
        );
        let err = Config::parse(&content)
            .unwrap()
            .validate(None, &[])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_invalid_feed_url_rejected() {
        let content = MINIMAL.replace("https://example.com/feed.xml", "");
        let err = Config::parse(&content)
            .unwrap()
            .validate(None, &[])
            .unwrap_err();
        assert!(matches!(err, ConfigError::SourceList(_)));
    }

    #[test]
    fn test_no_enabled_categories_rejected() {
        let content = MINIMAL.replace("channel_id = -1001", "channel_id = -1001\nenabled = false");
        let err = Config::parse(&content)
            .unwrap()
            .validate(None, &[])
            .unwrap_err();
        assert!(err.to_string().contains("no enabled categories"));
    }

    #[test]
    fn test_only_selects_named_categories() {
        let content = format!(
            "{}\n[[categories]]\nname = \"blogs\"\nchannel_id = -2\nenabled = false\n",
            MINIMAL
        );
        let config = Config::parse(&content).unwrap();

        let settings = config
            .clone()
            .validate(None, &["blogs".to_string()])
            .unwrap();
        let names: Vec<&str> = settings.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["blogs"]);

        let err = config
            .validate(None, &["missing".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("unknown category"));
    }

    #[test]
    fn test_sources_resolved_relative_to_config() {
        let dir = write_temp(
            "relative_sources",
            &[
                (
                    "feedcast.toml",
                    "bot_token = \"1:a\"\nparse_mode = \"markdown_v2\"\nwindow_hours = 6\n\n[[categories]]\nname = \"weekly\"\nchannel_id = -5\nsources = \"weekly.json\"\n",
                ),
                (
                    "weekly.json",
                    r#"{"rss_info": [{"title": "TWiR", "url": "https://this-week-in-rust.org/rss.xml", "full_content": true}]}"#,
                ),
            ],
        );

        let settings = Config::load(&dir.join("feedcast.toml"))
            .unwrap()
            .validate(None, &[])
            .unwrap();
        assert_eq!(settings.parse_mode, ParseMode::MarkdownV2);
        assert_eq!(settings.window, WindowPolicy::hours(6));
        assert_eq!(settings.categories[0].sources.len(), 1);
        assert!(settings.categories[0].sources[0].full_content);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_source_list_is_error() {
        let content = MINIMAL.replace(
            "channel_id = -1001",
            "channel_id = -1001\nsources = \"/tmp/feedcast_test_no_such_list.json\"",
        );
        let err = Config::parse(&content)
            .unwrap()
            .validate(None, &[])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::SourceList(SourceListError::Io { .. })
        ));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = write_temp("too_large", &[("feedcast.toml", &"a".repeat(1_048_577))]);
        let err = Config::load(&dir.join("feedcast.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_debug_masks_token() {
        let config = Config::parse(MINIMAL).unwrap();
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("123:abc"));
        assert!(debug_output.contains("[REDACTED]"));

        let settings = config.validate(None, &[]).unwrap();
        assert!(!format!("{:?}", settings).contains("123:abc"));
    }
}
