//! Polling fallback.
//!
//! The live channel can die without ever reporting an error, so the
//! reconciler re-fetches the first page whenever the channel looks stale.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::config::NotifyConfig;
use crate::live::ConnectionStatus;

/// Whether the live channel should be considered stale at `now`.
///
/// Stale means the channel is not connected, or nothing has been merged
/// for `stale_after`. A session that never merged anything is stale.
pub fn is_stale(
    status: ConnectionStatus,
    last_message_at: Option<Instant>,
    now: Instant,
    stale_after: Duration,
) -> bool {
    if !status.is_connected() {
        return true;
    }
    match last_message_at {
        Some(at) => now.saturating_duration_since(at) > stale_after,
        None => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub stale_after: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(45),
            stale_after: Duration::from_secs(30),
        }
    }
}

impl PollPolicy {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            stale_after: config.stale_after(),
        }
    }

    /// A fresh ticker whose first tick fires one full interval from now.
    pub fn ticker(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    pub fn is_stale(&self, status: ConnectionStatus, last_message_at: Option<Instant>) -> bool {
        is_stale(status, last_message_at, Instant::now(), self.stale_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STALE: Duration = Duration::from_secs(30);

    #[test]
    fn test_not_connected_is_always_stale() {
        let now = Instant::now();
        for status in [
            ConnectionStatus::Idle,
            ConnectionStatus::Connecting,
            ConnectionStatus::Error,
        ] {
            assert!(is_stale(status, Some(now), now, STALE), "{status}");
        }
    }

    #[test]
    fn test_connected_staleness_follows_last_message() {
        let now = Instant::now();
        let connected = ConnectionStatus::Connected;

        assert!(!is_stale(connected, Some(now), now, STALE));
        assert!(!is_stale(connected, Some(now), now + STALE, STALE));
        assert!(is_stale(
            connected,
            Some(now),
            now + STALE + Duration::from_millis(1),
            STALE
        ));
        assert!(is_stale(connected, None, now, STALE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_first_tick_after_full_interval() {
        let policy = PollPolicy::default();
        let start = Instant::now();
        let mut ticker = policy.ticker();
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(45));
    }
}
