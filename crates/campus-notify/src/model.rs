//! Notification record model.
//!
//! A `NotificationRecord` is the single entity shared by every ingestion
//! path. Its wire form is the backend's camelCase JSON; sparse payloads such
//! as `{"id": 7}` deserialize with every other field defaulted.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Server-assigned notification id. Larger ids are newer.
pub type NotificationId = i64;

/// Notification type tag.
///
/// Unknown tags are preserved in `Other` so newer backends do not break
/// older clients. An empty `Other` means the payload carried no tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    AppointmentCreated,
    AppointmentUpdated,
    AppointmentCancelled,
    Announcement,
    System,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AppointmentCreated => "APPOINTMENT_CREATED",
            Self::AppointmentUpdated => "APPOINTMENT_UPDATED",
            Self::AppointmentCancelled => "APPOINTMENT_CANCELLED",
            Self::Announcement => "ANNOUNCEMENT",
            Self::System => "SYSTEM",
            Self::Other(tag) => tag,
        }
    }

    /// True when the payload did not carry a type tag at all.
    pub fn is_unspecified(&self) -> bool {
        matches!(self, Self::Other(tag) if tag.is_empty())
    }
}

impl Default for NotificationKind {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl From<String> for NotificationKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "APPOINTMENT_CREATED" => Self::AppointmentCreated,
            "APPOINTMENT_UPDATED" => Self::AppointmentUpdated,
            "APPOINTMENT_CANCELLED" => Self::AppointmentCancelled,
            "ANNOUNCEMENT" => Self::Announcement,
            "SYSTEM" => Self::System,
            _ => Self::Other(tag),
        }
    }
}

impl From<&str> for NotificationKind {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single notification as known to the client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: NotificationId,
    #[serde(default, alias = "recipientUserId")]
    pub recipient_id: i64,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(
        default,
        alias = "relatedAppointmentId",
        skip_serializing_if = "Option::is_none"
    )]
    pub related_entity_id: Option<i64>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    /// Localisation key, when the backend sends templated text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    /// JSON-encoded arguments for `message_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_args: Option<String>,
}

impl NotificationRecord {
    /// Create a record with the given id and display text.
    pub fn new(id: NotificationId, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<NotificationKind>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_recipient(mut self, recipient_id: i64) -> Self {
        self.recipient_id = recipient_id;
        self
    }

    pub fn with_related_entity(mut self, related_entity_id: i64) -> Self {
        self.related_entity_id = Some(related_entity_id);
        self
    }

    pub fn with_read_at(mut self, read_at: impl Into<String>) -> Self {
        self.read_at = Some(read_at.into());
        self
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// Overwrite fields with those carried by `newer`.
    ///
    /// Fields absent from `newer` (empty strings, zero recipient, unspecified
    /// kind, `None`) keep their current value, mirroring an object spread of
    /// the newer payload over the older one.
    pub fn merge_from(&mut self, newer: &NotificationRecord) {
        debug_assert_eq!(self.id, newer.id);

        if newer.recipient_id != 0 {
            self.recipient_id = newer.recipient_id;
        }
        if !newer.kind.is_unspecified() {
            self.kind = newer.kind.clone();
        }
        merge_string(&mut self.title, &newer.title);
        merge_string(&mut self.message, &newer.message);
        merge_string(&mut self.created_at, &newer.created_at);
        merge_option(&mut self.related_entity_id, &newer.related_entity_id);
        merge_option(&mut self.read_at, &newer.read_at);
        merge_option(&mut self.deleted_at, &newer.deleted_at);
        merge_option(&mut self.message_key, &newer.message_key);
        merge_option(&mut self.message_args, &newer.message_args);
    }
}

fn merge_string(slot: &mut String, newer: &str) {
    if !newer.is_empty() {
        newer.clone_into(slot);
    }
}

fn merge_option<T: Clone>(slot: &mut Option<T>, newer: &Option<T>) {
    if newer.is_some() {
        slot.clone_from(newer);
    }
}
