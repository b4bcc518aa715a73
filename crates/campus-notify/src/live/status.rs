//! Live channel connection state machine.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{NotifyError, Result};
use crate::live::LiveEvent;

/// Connection status of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No session. Either never connected, torn down, or no credential.
    #[default]
    Idle,
    /// Socket open or STOMP handshake in flight.
    Connecting,
    /// Handshake done and subscribed to the notification topic.
    Connected,
    /// Protocol error or socket closed.
    Error,
}

impl ConnectionStatus {
    /// Transition table.
    ///
    /// ```text
    /// Idle       -> Connecting
    /// Connecting -> Connected | Error | Idle
    /// Connected  -> Error | Idle
    /// Error      -> Connecting | Idle
    /// ```
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Idle)
                | (Connected, Error)
                | (Connected, Idle)
                | (Error, Connecting)
                | (Error, Idle)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared status cell that enforces the transition table and publishes
/// every change as a [`LiveEvent::Status`].
#[derive(Clone)]
pub(crate) struct StatusTracker {
    current: Arc<RwLock<ConnectionStatus>>,
    events: mpsc::Sender<LiveEvent>,
}

impl StatusTracker {
    pub(crate) fn new(events: mpsc::Sender<LiveEvent>) -> Self {
        Self {
            current: Arc::new(RwLock::new(ConnectionStatus::Idle)),
            events,
        }
    }

    pub(crate) fn get(&self) -> ConnectionStatus {
        *self.current.read()
    }

    /// Move to `next`. Transitioning to the current status is a no-op.
    pub(crate) fn transition(&self, next: ConnectionStatus) -> Result<()> {
        self.apply(next, None)
    }

    /// Like [`transition`](Self::transition), but skipped once `token` is
    /// cancelled. The check happens under the status lock so a torn-down
    /// transport task cannot overwrite the status set by its owner.
    pub(crate) fn transition_unless_cancelled(
        &self,
        next: ConnectionStatus,
        token: &CancellationToken,
    ) -> Result<()> {
        self.apply(next, Some(token))
    }

    fn apply(&self, next: ConnectionStatus, token: Option<&CancellationToken>) -> Result<()> {
        {
            let mut current = self.current.write();
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Ok(());
            }
            if *current == next {
                return Ok(());
            }
            if !current.can_transition_to(next) {
                warn!(from = %*current, to = %next, "Rejected live channel transition");
                return Err(NotifyError::InvalidStateTransition {
                    from: *current,
                    to: next,
                });
            }
            debug!(from = %*current, to = %next, "Live channel status changed");
            *current = next;
        }

        if self.events.try_send(LiveEvent::Status(next)).is_err() {
            debug!(status = %next, "Live event receiver full or gone; status event dropped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionStatus::*;

    const ALL: [ConnectionStatus; 4] = [Idle, Connecting, Connected, Error];

    #[test]
    fn test_transition_table() {
        let allowed = [
            (Idle, Connecting),
            (Connecting, Connected),
            (Connecting, Error),
            (Connecting, Idle),
            (Connected, Error),
            (Connected, Idle),
            (Error, Connecting),
            (Error, Idle),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_idle_cannot_jump_to_connected() {
        assert!(!Idle.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Connected));
    }

    #[tokio::test]
    async fn test_tracker_publishes_changes() {
        let (tx, mut rx) = mpsc::channel(8);
        let tracker = StatusTracker::new(tx);

        tracker.transition(Connecting).unwrap();
        tracker.transition(Connecting).unwrap();
        tracker.transition(Connected).unwrap();

        assert!(matches!(rx.recv().await, Some(LiveEvent::Status(Connecting))));
        assert!(matches!(rx.recv().await, Some(LiveEvent::Status(Connected))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tracker_rejects_illegal_transition() {
        let (tx, _rx) = mpsc::channel(8);
        let tracker = StatusTracker::new(tx);

        let err = tracker.transition(Connected).unwrap_err();
        assert!(matches!(
            err,
            NotifyError::InvalidStateTransition {
                from: Idle,
                to: Connected
            }
        ));
        assert_eq!(tracker.get(), Idle);
    }

    #[tokio::test]
    async fn test_cancelled_token_suppresses_transition() {
        let (tx, _rx) = mpsc::channel(8);
        let tracker = StatusTracker::new(tx);
        tracker.transition(Connecting).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        tracker.transition_unless_cancelled(Error, &token).unwrap();
        assert_eq!(tracker.get(), Connecting);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Connected).unwrap(), "\"connected\"");
    }
}
