use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::format::ParseMode;

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Transport failure. The URL is stripped because it embeds the bot token.
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),
    /// The Bot API answered `ok: false`.
    #[error("Telegram API error {code}: {description}")]
    Api {
        code: u16,
        description: String,
        retry_after: Option<u64>,
    },
    #[error("Unexpected response (HTTP {status}): {detail}")]
    InvalidResponse { status: u16, detail: String },
    #[error("Insecure API base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

impl DeliveryError {
    /// Server-requested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryError::Api {
                retry_after: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        DeliveryError::Network(e.without_url())
    }
}

#[derive(Debug, Serialize)]
struct LinkPreviewOptions {
    is_disabled: bool,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    link_preview_options: Option<LinkPreviewOptions>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

/// Minimal Telegram Bot API client: one `sendMessage` call per [`send`](Self::send).
///
/// Built once per run from the bot token. Cloning shares the HTTP client.
#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    token: Arc<SecretString>,
    timeout: Duration,
    disable_link_preview: bool,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("disable_link_preview", &self.disable_link_preview)
            .finish()
    }
}

impl TelegramClient {
    /// Creates a client for `base_url` (normally [`DEFAULT_API_BASE_URL`]).
    ///
    /// The token travels in the request path, so plain HTTP is only accepted
    /// for localhost.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        token: SecretString,
    ) -> Result<Self, DeliveryError> {
        let base = base_url.trim_end_matches('/');
        if !base.starts_with("https://") {
            let is_localhost =
                base.starts_with("http://127.0.0.1") || base.starts_with("http://localhost");
            if !is_localhost {
                tracing::error!(base_url = %base, "Rejecting non-HTTPS Bot API base URL");
                return Err(DeliveryError::InsecureBaseUrl);
            }
            tracing::warn!(base_url = %base, "Using non-HTTPS Bot API base URL (localhost only)");
        }

        Ok(Self {
            client,
            base_url: base.to_string(),
            token: Arc::new(token),
            timeout: DEFAULT_SEND_TIMEOUT,
            disable_link_preview: false,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_link_preview_disabled(mut self, disabled: bool) -> Self {
        self.disable_link_preview = disabled;
        self
    }

    /// Attempts exactly one send. Retrying is the caller's concern.
    pub async fn send(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<(), DeliveryError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.base_url,
            self.token.expose_secret()
        );
        let body = SendMessageRequest {
            chat_id,
            text,
            parse_mode: parse_mode.as_api_str(),
            link_preview_options: self
                .disable_link_preview
                .then_some(LinkPreviewOptions { is_disabled: true }),
        };

        // The deadline covers reading the reply body too.
        let deadline = tokio::time::Instant::now() + self.timeout;
        let timed_out = |_: Elapsed| DeliveryError::Timeout(self.timeout);

        let request = self.client.post(&url).json(&body);
        let response = tokio::time::timeout_at(deadline, request.send())
            .await
            .map_err(timed_out)??;

        let status = response.status();
        let bytes = tokio::time::timeout_at(deadline, response.bytes())
            .await
            .map_err(timed_out)??;

        match serde_json::from_slice::<ApiResponse>(&bytes) {
            Ok(api) if api.ok && status.is_success() => Ok(()),
            Ok(api) => Err(DeliveryError::Api {
                code: api.error_code.unwrap_or(status.as_u16()),
                description: api
                    .description
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string()),
                retry_after: api.parameters.unwrap_or_default().retry_after,
            }),
            Err(e) => Err(DeliveryError::InvalidResponse {
                status: status.as_u16(),
                detail: e.to_string(),
            }),
        }
    }
}
