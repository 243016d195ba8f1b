use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::util::validate_feed_url;

/// Maximum size of a source list file (1 MB).
const MAX_SOURCE_LIST_SIZE: u64 = 1_048_576;

/// Errors that can occur while loading a source list file.
#[derive(Debug, Error)]
pub enum SourceListError {
    /// File I/O error.
    #[error("Failed to read source list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid source list document.
    #[error("Invalid JSON in source list {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The file exceeds [`MAX_SOURCE_LIST_SIZE`].
    #[error("Source list {path} is too large ({size} bytes, max 1048576)")]
    TooLarge { path: String, size: u64 },

    /// An entry has an empty or unusable URL.
    #[error("Source '{title}' has an invalid URL '{url}': {reason}")]
    InvalidSource {
        title: String,
        url: String,
        reason: String,
    },
}

/// One syndication endpoint. Identity is the URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedSource {
    /// Display title used in diagnostics.
    #[serde(default)]
    pub title: String,
    pub url: String,
    /// Include the entry description in the posted message.
    #[serde(default)]
    pub full_content: bool,
}

impl FeedSource {
    pub fn new(title: impl Into<String>, url: impl Into<String>, full_content: bool) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            full_content,
        }
    }

    /// Title for log records, falling back to the URL for untitled sources.
    pub fn label(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.url
        } else {
            &self.title
        }
    }

    /// Checks the URL invariant: non-empty and a usable http(s) URL.
    pub fn validate(&self) -> Result<(), SourceListError> {
        validate_feed_url(&self.url)
            .map(|_| ())
            .map_err(|e| SourceListError::InvalidSource {
                title: self.title.clone(),
                url: self.url.clone(),
                reason: e.to_string(),
            })
    }
}

/// A named group of feed sources sharing one destination channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCategory {
    pub name: String,
    /// Telegram chat id of the destination channel. Never zero.
    pub channel_id: i64,
    /// Sources in configuration order.
    pub sources: Vec<FeedSource>,
}

/// On-disk layout of a source list file.
#[derive(Debug, Deserialize)]
struct SourceListFile {
    #[serde(rename = "rss_info", default)]
    sources: Vec<FeedSource>,
}

/// Loads a JSON source list from disk.
///
/// The file has the shape `{"rss_info": [{"title", "url", "full_content"}]}`.
/// Every entry is validated; a single bad entry fails the whole load, since a
/// broken list is a startup error rather than something to skip silently.
pub fn load_source_list(path: &Path) -> Result<Vec<FeedSource>, SourceListError> {
    let path_str = path.display().to_string();

    let meta = std::fs::metadata(path).map_err(|source| SourceListError::Io {
        path: path_str.clone(),
        source,
    })?;
    if meta.len() > MAX_SOURCE_LIST_SIZE {
        return Err(SourceListError::TooLarge {
            path: path_str,
            size: meta.len(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| SourceListError::Io {
        path: path_str.clone(),
        source,
    })?;

    let sources = parse_source_list(&content).map_err(|source| SourceListError::Parse {
        path: path_str.clone(),
        source,
    })?;

    for source in &sources {
        source.validate()?;
    }

    tracing::debug!(path = %path_str, sources = sources.len(), "Loaded source list");
    Ok(sources)
}

fn parse_source_list(content: &str) -> Result<Vec<FeedSource>, serde_json::Error> {
    let file: SourceListFile = serde_json::from_str(content)?;
    Ok(file.sources)
}
