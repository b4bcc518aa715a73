//! Configuration for the notification subsystem.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{NotifyError, Result};

/// Default STOMP destination for per-user notifications.
pub const DEFAULT_TOPIC: &str = "/user/queue/notifications";

/// Notification subsystem configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Backend base URL (scheme, host and port).
    pub base_url: String,
    /// Live channel websocket URL. Derived from `base_url` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    /// STOMP destination to subscribe to.
    pub topic: String,
    /// Records requested per page.
    pub page_size: u32,
    /// Polling fallback period in seconds.
    pub poll_interval_secs: u64,
    /// The live channel counts as stale after this many seconds without a merged message.
    pub stale_after_secs: u64,
    /// Fixed transport reconnect delay in milliseconds. Zero disables auto-reconnect.
    pub reconnect_delay_ms: u64,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
    /// STOMP heart-beat interval in milliseconds. Zero disables heart-beats.
    pub heartbeat_ms: u64,
    /// Extra attempts when the platform push token is not yet available.
    pub token_retry_attempts: u32,
    /// Delay between push token attempts in milliseconds.
    pub token_retry_delay_ms: u64,
    /// Platform tag sent with device registration.
    pub device_platform: String,
    /// Alert channel id.
    pub alert_channel_id: String,
    /// Alert channel display name.
    pub alert_channel_name: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            ws_url: None,
            topic: DEFAULT_TOPIC.to_string(),
            page_size: 20,
            poll_interval_secs: 45,
            stale_after_secs: 30,
            reconnect_delay_ms: 5000,
            request_timeout_secs: 10,
            heartbeat_ms: 10_000,
            token_retry_attempts: 5,
            token_retry_delay_ms: 1500,
            device_platform: "ANDROID".to_string(),
            alert_channel_id: "general".to_string(),
            alert_channel_name: "General".to_string(),
        }
    }
}

impl NotifyConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Check the configuration for values the subsystem cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(NotifyError::config("page_size must be greater than zero"));
        }
        if self.poll_interval_secs == 0 {
            return Err(NotifyError::config(
                "poll_interval_secs must be greater than zero",
            ));
        }
        if !self.topic.starts_with('/') {
            return Err(NotifyError::config(format!(
                "topic must be an absolute destination, got `{}`",
                self.topic
            )));
        }

        let base = self.parsed_base_url()?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(NotifyError::config(format!(
                "base_url must use http or https, got `{}`",
                base.scheme()
            )));
        }

        let ws = self.websocket_url()?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(NotifyError::config(format!(
                "ws_url must use ws or wss, got `{}`",
                ws.scheme()
            )));
        }
        Ok(())
    }

    pub fn parsed_base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| NotifyError::config(format!("invalid base_url `{}`: {e}", self.base_url)))
    }

    /// REST root for notification endpoints.
    pub fn notifications_url(&self) -> Result<Url> {
        let base = self.base_url.trim_end_matches('/');
        Url::parse(&format!("{base}/api/notifications"))
            .map_err(|e| NotifyError::config(format!("invalid base_url `{}`: {e}", self.base_url)))
    }

    /// Websocket endpoint of the live channel.
    ///
    /// Without an explicit `ws_url` this is the raw-websocket transport of the
    /// backend's SockJS endpoint: `{base_url}/ws/websocket` with the scheme
    /// switched to `ws`/`wss`.
    pub fn websocket_url(&self) -> Result<Url> {
        if let Some(raw) = &self.ws_url {
            return Url::parse(raw)
                .map_err(|e| NotifyError::config(format!("invalid ws_url `{raw}`: {e}")));
        }

        let mut url = self.parsed_base_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| NotifyError::config("cannot derive websocket scheme from base_url"))?;
        let path = format!("{}/ws/websocket", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `None` when transport auto-reconnect is disabled.
    pub fn reconnect_delay(&self) -> Option<Duration> {
        (self.reconnect_delay_ms > 0).then(|| Duration::from_millis(self.reconnect_delay_ms))
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn token_retry_delay(&self) -> Duration {
        Duration::from_millis(self.token_retry_delay_ms)
    }
}
