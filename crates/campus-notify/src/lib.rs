//! campus-notify: real-time notification delivery for the campus scheduling client.
//!
//! Notifications reach the client over three independent paths which are
//! reconciled into one deduplicated, newest-first list.
//!
//! ## Ingestion
//!
//! - [`LiveChannel`] - STOMP subscription over a websocket
//! - [`PushIngestion`] - out-of-band push payloads, injected through an [`IngestionPort`]
//! - [`PollPolicy`] - fallback polling while the live channel looks stale
//!
//! ## State
//!
//! - [`RecordStore`] - records keyed by id with field-wise merging
//! - [`Reconciler`] - owns the store and publishes [`NotificationSnapshot`]s
//! - [`AlertPresenter`] - one device alert per notification id per session
//!
//! ## Backend
//!
//! - [`NotificationApi`] - REST operations, implemented by [`HttpGateway`]
//! - [`SessionStore`] - bearer credential and last registered push token

pub mod alert;
pub mod config;
pub mod error;
pub mod gateway;
pub mod live;
pub mod model;
pub mod poll;
pub mod push;
pub mod reconciler;
pub mod session;
pub mod store;
mod tls;

pub use alert::{
    AlertData, AlertPlatform, AlertPresenter, ChannelSpec, LocalAlert, LogAlertPlatform,
    Navigator, Route, route_alert_press,
};
pub use config::NotifyConfig;
pub use error::{NotifyError, Result};
pub use gateway::{HttpGateway, NotificationApi};
pub use live::{ConnectionStatus, LiveChannel, LiveChannelConfig, LiveEvent};
pub use model::{NotificationId, NotificationKind, NotificationRecord};
pub use poll::{PollPolicy, is_stale};
pub use push::{
    IngestionPort, PushIngestion, PushMessage, PushNotification, PushTokenSource,
    TokenRegistration, TokenRetryPolicy, on_token_refresh, record_from_push,
    register_device_token, register_token,
};
pub use reconciler::{NotificationSnapshot, Reconciler};
pub use session::{FileSessionStore, MemorySessionStore, SessionStore};
pub use store::{MergeSummary, RecordStore, UpsertOutcome};
