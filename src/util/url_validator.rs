use thiserror::Error;
use url::Url;

/// Why a feed URL was rejected.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string is empty or whitespace.
    #[error("URL is empty")]
    Empty,
    #[error("Malformed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Anything but http or https.
    #[error("Scheme '{0}' is not supported, use http or https")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Parses and checks a feed URL.
///
/// Rejects empty strings, unparseable URLs, non-HTTP(S) schemes such as
/// `file://` or `ftp://`, and URLs without a host.
///
/// # Examples
///
/// ```
/// use feedcast::util::validate_feed_url;
///
/// let url = validate_feed_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_feed_url("").is_err());
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let trimmed = url_str.trim();
    if trimmed.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let url = Url::parse(trimmed)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}
