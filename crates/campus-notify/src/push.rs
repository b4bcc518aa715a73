//! Out-of-band push ingestion.
//!
//! Push payloads are converted into records, alerted through the shared
//! [`AlertPresenter`] and injected into the reconciler through an
//! [`IngestionPort`]. Device-token registration lives here as well.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::alert::AlertPresenter;
use crate::config::NotifyConfig;
use crate::error::Result;
use crate::gateway::NotificationApi;
use crate::model::{NotificationKind, NotificationRecord};
use crate::session::SessionStore;

const FALLBACK_TITLE: &str = "Notification";

/// Visible part of a push message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Push message as delivered by the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub notification: Option<PushNotification>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl PushMessage {
    /// Non-empty string value of a data field.
    fn data_str(&self, key: &str) -> Option<&str> {
        match self.data.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Integer value of a data field. Platforms deliver data as strings,
    /// so numeric strings are accepted alongside JSON numbers.
    fn data_i64(&self, key: &str) -> Option<i64> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn block_title(&self) -> Option<&str> {
        self.notification.as_ref()?.title.as_deref().filter(|s| !s.is_empty())
    }

    fn block_body(&self) -> Option<&str> {
        self.notification.as_ref()?.body.as_deref().filter(|s| !s.is_empty())
    }
}

/// Derive a record from a push payload.
///
/// Returns `None` unless `data.id` is a positive integer.
pub fn record_from_push(msg: &PushMessage) -> Option<NotificationRecord> {
    let id = msg.data_i64("id").filter(|id| *id > 0)?;

    let title = msg
        .block_title()
        .or_else(|| msg.data_str("title"))
        .unwrap_or(FALLBACK_TITLE);
    let message = msg
        .block_body()
        .or_else(|| msg.data_str("body"))
        .or_else(|| msg.data_str("message"))
        .unwrap_or_default();

    let kind = msg
        .data_str("type")
        .map(NotificationKind::from)
        .unwrap_or(NotificationKind::System);
    let created_at = msg
        .data_str("createdAt")
        .map(str::to_string)
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    Some(NotificationRecord {
        id,
        recipient_id: msg.data_i64("recipientUserId").unwrap_or_default(),
        kind,
        title: title.to_string(),
        message: message.to_string(),
        related_entity_id: msg
            .data_i64("relatedAppointmentId")
            .or_else(|| msg.data_i64("relatedEntityId")),
        created_at,
        read_at: None,
        deleted_at: None,
        message_key: msg.data_str("messageKey").map(str::to_string),
        message_args: msg.data_str("messageArgs").map(str::to_string),
    })
}

/// Registerable injection point into the reconciler.
///
/// The reconciler registers its sender on start and deregisters it on stop.
#[derive(Clone, Default)]
pub struct IngestionPort {
    sender: Arc<RwLock<Option<mpsc::Sender<NotificationRecord>>>>,
}

impl IngestionPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sender: mpsc::Sender<NotificationRecord>) {
        *self.sender.write() = Some(sender);
    }

    /// Remove the registration if it still belongs to `sender`.
    pub fn deregister(&self, sender: &mpsc::Sender<NotificationRecord>) {
        let mut current = self.sender.write();
        if current.as_ref().is_some_and(|s| s.same_channel(sender)) {
            *current = None;
        }
    }

    pub fn is_registered(&self) -> bool {
        self.sender.read().is_some()
    }

    /// Hand a record to the registered receiver. Returns whether it was accepted.
    pub fn inject(&self, record: NotificationRecord) -> bool {
        let id = record.id;
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            debug!(id, "No ingestion receiver registered; record dropped");
            return false;
        };
        match sender.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(id, "Ingestion queue full; record dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(id, "Ingestion receiver closed; record dropped");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arrival {
    Foreground,
    Background,
}

impl Arrival {
    fn as_str(self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

/// Push entry points.
#[derive(Clone)]
pub struct PushIngestion {
    presenter: Arc<AlertPresenter>,
    port: IngestionPort,
}

impl PushIngestion {
    pub fn new(presenter: Arc<AlertPresenter>, port: IngestionPort) -> Self {
        Self { presenter, port }
    }

    /// Handle a message received while the app is in the foreground.
    pub async fn handle_foreground(&self, msg: &PushMessage) -> Option<NotificationRecord> {
        self.handle(msg, Arrival::Foreground).await
    }

    /// Handle a message received in the background or on a cold start.
    pub async fn handle_background(&self, msg: &PushMessage) -> Option<NotificationRecord> {
        self.handle(msg, Arrival::Background).await
    }

    async fn handle(&self, msg: &PushMessage, arrival: Arrival) -> Option<NotificationRecord> {
        let Some(record) = record_from_push(msg) else {
            debug!(
                arrival = arrival.as_str(),
                message_id = ?msg.message_id,
                "Push payload without a usable id; dropped"
            );
            return None;
        };

        debug!(arrival = arrival.as_str(), id = record.id, "Push notification received");
        self.presenter.display(&record).await;
        self.port.inject(record.clone());
        Some(record)
    }
}

/// Platform push token provider.
#[async_trait]
pub trait PushTokenSource: Send + Sync {
    /// Current token, or `None` while the platform has not issued one yet.
    async fn token(&self) -> Result<Option<String>>;
}

/// Bounded retry for obtaining the platform token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    pub delay: Duration,
}

impl Default for TokenRetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            delay: Duration::from_millis(1500),
        }
    }
}

impl TokenRetryPolicy {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            retries: config.token_retry_attempts,
            delay: config.token_retry_delay(),
        }
    }
}

/// Outcome of a device token registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRegistration {
    /// Token uploaded and persisted.
    Registered(String),
    /// Token matches the persisted one; nothing uploaded.
    Unchanged,
    /// The platform never produced a token.
    Unavailable,
}

/// Poll `source` for a token under `policy`.
pub async fn obtain_token(
    source: &dyn PushTokenSource,
    policy: &TokenRetryPolicy,
) -> Option<String> {
    for attempt in 0..=policy.retries {
        match source.token().await {
            Ok(Some(token)) if !token.is_empty() => return Some(token),
            Ok(_) => debug!(attempt, "Push token not available yet"),
            Err(e) => warn!(attempt, error = %e, "Failed to read push token"),
        }
        if attempt < policy.retries {
            tokio::time::sleep(policy.delay).await;
        }
    }
    None
}

/// Upload `token` unless it matches the persisted one; persist it after upload.
pub async fn register_token(
    token: &str,
    api: &dyn NotificationApi,
    session: &dyn SessionStore,
    platform: &str,
) -> Result<TokenRegistration> {
    if session.device_token().await.as_deref() == Some(token) {
        debug!("Device token unchanged; skipping registration");
        return Ok(TokenRegistration::Unchanged);
    }

    api.register_device(token, platform).await?;
    session.set_device_token(token).await?;
    info!(platform, token_len = token.len(), "Device token registered");
    Ok(TokenRegistration::Registered(token.to_string()))
}

/// Handle a token the platform rotated while the app was running.
pub async fn on_token_refresh(
    token: &str,
    api: &dyn NotificationApi,
    session: &dyn SessionStore,
    platform: &str,
) -> Result<TokenRegistration> {
    if token.is_empty() {
        debug!("Ignoring empty refreshed push token");
        return Ok(TokenRegistration::Unavailable);
    }
    info!(platform, "Push token refreshed");
    register_token(token, api, session, platform).await
}

/// Obtain a platform token with retries and register it on change.
pub async fn register_device_token(
    source: &dyn PushTokenSource,
    api: &dyn NotificationApi,
    session: &dyn SessionStore,
    policy: &TokenRetryPolicy,
    platform: &str,
) -> Result<TokenRegistration> {
    let Some(token) = obtain_token(source, policy).await else {
        warn!(
            attempts = policy.retries + 1,
            "Failed to obtain push token after retries"
        );
        return Ok(TokenRegistration::Unavailable);
    };
    register_token(&token, api, session, platform).await
}
