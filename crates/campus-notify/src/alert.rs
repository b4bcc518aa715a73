//! Device-level alert presentation.
//!
//! The presenter guarantees at most one platform alert per notification id
//! for the lifetime of the process. Presentation failures never propagate
//! into the merge pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::error::{NotifyError, Result};
use crate::model::{NotificationId, NotificationRecord};

/// Alert channel (Android channel / iOS category) alerts are posted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
}

impl ChannelSpec {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            id: config.alert_channel_id.clone(),
            name: config.alert_channel_name.clone(),
        }
    }
}

/// Data attached to an alert, handed back when the user presses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertData {
    pub notification_id: NotificationId,
    #[serde(default, alias = "relatedAppointmentId", skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<i64>,
}

/// A single platform alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAlert {
    pub channel_id: String,
    pub title: String,
    pub body: String,
    pub data: AlertData,
}

/// Platform alert capability.
#[async_trait]
pub trait AlertPlatform: Send + Sync {
    /// Ask for permission to present alerts. Cheap to call repeatedly.
    /// Returns `false` when the user has denied it.
    async fn request_permission(&self) -> Result<bool>;

    /// Create the channel if it does not exist yet.
    async fn create_channel(&self, spec: &ChannelSpec) -> Result<()>;

    async fn display(&self, alert: &LocalAlert) -> Result<()>;
}

/// Platform that writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertPlatform;

#[async_trait]
impl AlertPlatform for LogAlertPlatform {
    async fn request_permission(&self) -> Result<bool> {
        Ok(true)
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<()> {
        debug!(channel = %spec.id, name = %spec.name, "Alert channel ready");
        Ok(())
    }

    async fn display(&self, alert: &LocalAlert) -> Result<()> {
        info!(
            id = alert.data.notification_id,
            channel = %alert.channel_id,
            title = %alert.title,
            body = %alert.body,
            "Notification alert"
        );
        Ok(())
    }
}

/// Session-scoped alert deduplication in front of an [`AlertPlatform`].
pub struct AlertPresenter {
    platform: Arc<dyn AlertPlatform>,
    channel: ChannelSpec,
    channel_ready: AtomicBool,
    displayed: Mutex<HashSet<NotificationId>>,
}

impl AlertPresenter {
    pub fn new(platform: Arc<dyn AlertPlatform>, channel: ChannelSpec) -> Self {
        Self {
            platform,
            channel,
            channel_ready: AtomicBool::new(false),
            displayed: Mutex::new(HashSet::new()),
        }
    }

    /// Request permission and create the channel ahead of the first alert.
    pub async fn prepare(&self) {
        if let Err(e) = self.ensure_channel().await {
            warn!(error = %e, "Alert permission or channel setup failed");
        }
    }

    /// Present `record` unless its id was already presented this session.
    ///
    /// Returns whether a platform alert was issued.
    pub async fn display(&self, record: &NotificationRecord) -> bool {
        // Reserve the id up front so concurrent callers cannot both present it.
        if !self.displayed.lock().insert(record.id) {
            return false;
        }

        match self.present(record).await {
            Ok(()) => {
                debug!(id = record.id, "Displayed local alert");
                true
            }
            Err(e) => {
                self.displayed.lock().remove(&record.id);
                warn!(id = record.id, error = %e, "Failed to display local alert");
                false
            }
        }
    }

    /// Mark ids as already presented without presenting them.
    pub fn seed<I>(&self, ids: I)
    where
        I: IntoIterator<Item = NotificationId>,
    {
        let mut displayed = self.displayed.lock();
        let before = displayed.len();
        displayed.extend(ids);
        debug!(seeded = displayed.len() - before, "Seeded displayed alert ids");
    }

    pub fn has_displayed(&self, id: NotificationId) -> bool {
        self.displayed.lock().contains(&id)
    }

    pub fn displayed_count(&self) -> usize {
        self.displayed.lock().len()
    }

    async fn present(&self, record: &NotificationRecord) -> Result<()> {
        self.ensure_channel().await?;

        let title = if record.title.is_empty() {
            "Notification".to_string()
        } else {
            record.title.clone()
        };
        let alert = LocalAlert {
            channel_id: self.channel.id.clone(),
            title,
            body: record.message.clone(),
            data: AlertData {
                notification_id: record.id,
                related_entity_id: record.related_entity_id,
            },
        };
        self.platform.display(&alert).await
    }

    async fn ensure_channel(&self) -> Result<()> {
        if !self.platform.request_permission().await? {
            return Err(NotifyError::presentation("alert permission denied"));
        }
        if !self.channel_ready.load(Ordering::Acquire) {
            self.platform.create_channel(&self.channel).await?;
            self.channel_ready.store(true, Ordering::Release);
        }
        Ok(())
    }
}

/// Screen an alert press navigates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    AppointmentDetail { id: i64 },
    Notifications,
}

impl Route {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AppointmentDetail { .. } => "AppointmentDetail",
            Self::Notifications => "Notifications",
        }
    }
}

/// Navigation capability used for alert-press routing.
pub trait Navigator: Send + Sync {
    fn is_ready(&self) -> bool;
    fn navigate_to(&self, route: &Route);
}

/// Route a pressed alert to its screen.
///
/// Returns the route taken, or `None` when the navigator is not ready yet.
pub fn route_alert_press(data: &AlertData, navigator: &dyn Navigator) -> Option<Route> {
    if !navigator.is_ready() {
        debug!(id = data.notification_id, "Navigator not ready; alert press ignored");
        return None;
    }
    let route = match data.related_entity_id {
        Some(id) => Route::AppointmentDetail { id },
        None => Route::Notifications,
    };
    navigator.navigate_to(&route);
    Some(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingPlatform {
        denied: AtomicBool,
        fail_display: AtomicBool,
        channels: AtomicUsize,
        permission_requests: AtomicUsize,
        alerts: Mutex<Vec<LocalAlert>>,
    }

    #[async_trait]
    impl AlertPlatform for RecordingPlatform {
        async fn request_permission(&self) -> Result<bool> {
            self.permission_requests.fetch_add(1, Ordering::SeqCst);
            Ok(!self.denied.load(Ordering::SeqCst))
        }

        async fn create_channel(&self, _spec: &ChannelSpec) -> Result<()> {
            self.channels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn display(&self, alert: &LocalAlert) -> Result<()> {
            if self.fail_display.load(Ordering::SeqCst) {
                return Err(NotifyError::presentation("platform rejected alert"));
            }
            self.alerts.lock().push(alert.clone());
            Ok(())
        }
    }

    fn presenter(platform: Arc<RecordingPlatform>) -> AlertPresenter {
        AlertPresenter::new(
            platform,
            ChannelSpec {
                id: "general".to_string(),
                name: "General".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_display_once_per_id() {
        let platform = Arc::new(RecordingPlatform::default());
        let presenter = presenter(platform.clone());
        let record = NotificationRecord::new(5, "Booked", "Tomorrow").with_related_entity(42);

        assert!(presenter.display(&record).await);
        assert!(!presenter.display(&record).await);
        assert!(!presenter.display(&record).await);

        let alerts = platform.alerts.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].channel_id, "general");
        assert_eq!(alerts[0].data.notification_id, 5);
        assert_eq!(alerts[0].data.related_entity_id, Some(42));
        assert_eq!(platform.channels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_seeded_ids_never_display() {
        let platform = Arc::new(RecordingPlatform::default());
        let presenter = presenter(platform.clone());
        presenter.seed([10, 9, 8]);

        for id in [10, 9, 8] {
            assert!(!presenter.display(&NotificationRecord::new(id, "old", "")).await);
        }
        assert!(presenter.display(&NotificationRecord::new(11, "new", "")).await);
        assert_eq!(platform.alerts.lock().len(), 1);
        assert_eq!(presenter.displayed_count(), 4);
    }

    #[tokio::test]
    async fn test_failed_display_is_retried_later() {
        let platform = Arc::new(RecordingPlatform::default());
        platform.fail_display.store(true, Ordering::SeqCst);
        let presenter = presenter(platform.clone());
        let record = NotificationRecord::new(3, "t", "m");

        assert!(!presenter.display(&record).await);
        assert!(!presenter.has_displayed(3));

        platform.fail_display.store(false, Ordering::SeqCst);
        assert!(presenter.display(&record).await);
        assert!(presenter.has_displayed(3));
    }

    #[tokio::test]
    async fn test_permission_denied_is_swallowed() {
        let platform = Arc::new(RecordingPlatform::default());
        platform.denied.store(true, Ordering::SeqCst);
        let presenter = presenter(platform.clone());

        assert!(!presenter.display(&NotificationRecord::new(1, "t", "m")).await);
        assert!(platform.alerts.lock().is_empty());
        assert_eq!(platform.channels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_title_falls_back() {
        let platform = Arc::new(RecordingPlatform::default());
        let presenter = presenter(platform.clone());
        presenter.display(&NotificationRecord::new(2, "", "body")).await;
        assert_eq!(platform.alerts.lock()[0].title, "Notification");
    }

    #[derive(Default)]
    struct RecordingNavigator {
        ready: bool,
        routes: Mutex<Vec<Route>>,
    }

    impl Navigator for RecordingNavigator {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn navigate_to(&self, route: &Route) {
            self.routes.lock().push(route.clone());
        }
    }

    #[test]
    fn test_route_alert_press() {
        let nav = RecordingNavigator {
            ready: true,
            ..Default::default()
        };
        let detail = AlertData {
            notification_id: 1,
            related_entity_id: Some(77),
        };
        let plain = AlertData {
            notification_id: 2,
            related_entity_id: None,
        };

        assert_eq!(
            route_alert_press(&detail, &nav),
            Some(Route::AppointmentDetail { id: 77 })
        );
        assert_eq!(route_alert_press(&plain, &nav), Some(Route::Notifications));
        assert_eq!(nav.routes.lock().len(), 2);
        assert_eq!(nav.routes.lock()[0].name(), "AppointmentDetail");
    }

    #[test]
    fn test_route_alert_press_not_ready() {
        let nav = RecordingNavigator::default();
        let data = AlertData {
            notification_id: 1,
            related_entity_id: Some(3),
        };
        assert_eq!(route_alert_press(&data, &nav), None);
        assert!(nav.routes.lock().is_empty());
    }

    #[test]
    fn test_alert_data_accepts_appointment_alias() {
        let data: AlertData =
            serde_json::from_str(r#"{"notificationId":4,"relatedAppointmentId":9}"#).unwrap();
        assert_eq!(data.related_entity_id, Some(9));
    }
}
