//! Live subscription channel.
//!
//! A STOMP session over a websocket, subscribed to the per-user notification
//! topic. Records and status changes are delivered as [`LiveEvent`]s.

mod channel;
mod status;
pub mod stomp;

pub use channel::{LiveChannel, LiveChannelConfig};
pub use status::ConnectionStatus;

use crate::model::NotificationRecord;

/// Events produced by the live channel.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// The connection status changed.
    Status(ConnectionStatus),
    /// A notification arrived on the subscribed topic.
    Record(NotificationRecord),
}
