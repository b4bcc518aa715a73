//! Reconciliation of the three ingestion paths into one record store.
//!
//! A [`Reconciler`] owns the [`RecordStore`], the live channel and the poll
//! ticker. One spawned event loop serialises live events, push injections
//! and poll ticks; UI-triggered operations await the gateway and then merge
//! under the same short lock. Every change is published as a
//! [`NotificationSnapshot`] on a `watch` channel.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::alert::AlertPresenter;
use crate::config::NotifyConfig;
use crate::error::Result;
use crate::gateway::NotificationApi;
use crate::live::{ConnectionStatus, LiveChannel, LiveChannelConfig, LiveEvent};
use crate::model::{NotificationId, NotificationRecord};
use crate::poll::PollPolicy;
use crate::push::IngestionPort;
use crate::session::SessionStore;
use crate::store::{RecordStore, UpsertOutcome};

const LIVE_EVENT_QUEUE: usize = 100;
const INJECTION_QUEUE: usize = 100;

/// What the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationSnapshot {
    /// Newest first.
    pub records: Vec<NotificationRecord>,
    pub unread_count: u64,
    pub status: ConnectionStatus,
    /// Last page loaded.
    pub page: u32,
    pub has_more: bool,
}

impl NotificationSnapshot {
    pub fn ids(&self) -> Vec<NotificationId> {
        self.records.iter().map(|r| r.id).collect()
    }
}

struct State {
    store: RecordStore,
    status: ConnectionStatus,
    last_message_at: Option<Instant>,
    page: u32,
    has_more: bool,
    /// Set once a first page has been seeded into the alerted set.
    seeded: bool,
}

impl State {
    fn snapshot(&self) -> NotificationSnapshot {
        NotificationSnapshot {
            records: self.store.records(),
            unread_count: self.store.unread_count(),
            status: self.status,
            page: self.page,
            has_more: self.has_more,
        }
    }
}

struct Inner {
    api: Arc<dyn NotificationApi>,
    live: LiveChannel,
    live_events: AsyncMutex<mpsc::Receiver<LiveEvent>>,
    presenter: Arc<AlertPresenter>,
    port: IngestionPort,
    state: Mutex<State>,
    snapshot: watch::Sender<NotificationSnapshot>,
    page_size: u32,
    poll: PollPolicy,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    injections: mpsc::Sender<NotificationRecord>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

pub struct Reconciler {
    inner: Arc<Inner>,
    running: AsyncMutex<Option<Running>>,
}

impl Reconciler {
    pub fn new(
        config: &NotifyConfig,
        api: Arc<dyn NotificationApi>,
        session: Arc<dyn SessionStore>,
        presenter: Arc<AlertPresenter>,
        port: IngestionPort,
    ) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(LIVE_EVENT_QUEUE);
        let live = LiveChannel::new(LiveChannelConfig::from_config(config)?, session, events_tx);
        let state = State {
            store: RecordStore::new(),
            status: ConnectionStatus::Idle,
            last_message_at: None,
            page: 0,
            has_more: true,
            seeded: false,
        };
        let (snapshot, _) = watch::channel(state.snapshot());

        Ok(Self {
            inner: Arc::new(Inner {
                api,
                live,
                live_events: AsyncMutex::new(events_rx),
                presenter,
                port,
                state: Mutex::new(state),
                snapshot,
                page_size: config.page_size,
                poll: PollPolicy::from_config(config),
            }),
            running: AsyncMutex::new(None),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.live.status()
    }

    pub fn presenter(&self) -> &Arc<AlertPresenter> {
        &self.inner.presenter
    }

    pub fn port(&self) -> &IngestionPort {
        &self.inner.port
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Start the session.
    ///
    /// Prepares the alert channel, registers the ingestion port, spawns the
    /// event loop, fetches the first page (seeding the alerted set) and then
    /// connects the live channel. Calling it twice is a no-op.
    pub async fn start(&self) {
        {
            let mut running = self.running.lock().await;
            if running.is_some() {
                return;
            }

            self.inner.presenter.prepare().await;

            let (tx, rx) = mpsc::channel(INJECTION_QUEUE);
            self.inner.port.register(tx.clone());

            let cancel = CancellationToken::new();
            let task = tokio::spawn(self.inner.clone().run(rx, cancel.clone()));
            *running = Some(Running {
                cancel,
                task,
                injections: tx,
            });
        }
        info!("Notification session started");

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Initial notification fetch failed");
        }
        match self.inner.live.connect().await {
            Ok(true) => {}
            Ok(false) => info!("No credential stored; relying on polling"),
            Err(e) => warn!(error = %e, "Failed to start live channel"),
        }
    }

    /// Stop the event loop, deregister the port and tear the live channel down.
    pub async fn stop(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = (&mut running.task).await
            && !e.is_cancelled()
        {
            warn!(error = %e, "Notification event loop ended abnormally");
        }
        self.inner.port.deregister(&running.injections);
        self.inner.live.disconnect().await;
        info!("Notification session stopped");
    }

    /// Replace the list with a fresh first page and the server unread count.
    ///
    /// First-page ids are seeded into the alerted set, so historical
    /// notifications never raise an alert.
    pub async fn refresh(&self) -> Result<()> {
        self.inner.refresh().await
    }

    /// Refresh after the app returns to the foreground.
    pub async fn on_foreground(&self) -> Result<()> {
        debug!("App returned to foreground; refreshing");
        self.inner.refresh().await
    }

    /// Fetch the next page. Returns `Ok(false)` when there is nothing more.
    pub async fn load_more(&self) -> Result<bool> {
        let inner = &self.inner;
        let next = {
            let st = inner.state.lock();
            if !st.has_more {
                return Ok(false);
            }
            st.page + 1
        };

        let records = inner.api.list(next, inner.page_size, false).await?;
        let fetched = records.len();
        // Older pages are history.
        inner.presenter.seed(records.iter().map(|r| r.id));

        let mut st = inner.state.lock();
        let summary = st.store.upsert_many(records);
        st.page = st.page.max(next);
        st.has_more = fetched >= inner.page_size as usize;
        debug!(
            page = next,
            fetched,
            inserted = summary.inserted.len(),
            has_more = st.has_more,
            "Loaded more notifications"
        );
        inner.publish(&st);
        Ok(true)
    }

    /// Merge a record that just happened (live, push or test injection).
    pub async fn add_or_update_external(&self, record: NotificationRecord) {
        self.inner.add_or_update_external(record).await;
    }

    /// Mark one record read locally, then on the backend.
    ///
    /// The unread count drops only when the stored record goes from unread
    /// to read, so repeated calls for one id decrement once.
    pub async fn mark_one_read_local(&self, id: NotificationId) -> Result<()> {
        let inner = &self.inner;
        {
            let now = Utc::now().to_rfc3339();
            let mut st = inner.state.lock();
            if st.store.mark_read(id, &now) {
                st.store.decrement_unread(1);
            }
            inner.publish(&st);
        }

        let updated = inner.api.mark_read(id).await?;
        let mut st = inner.state.lock();
        if st.store.contains(updated.id) {
            st.store.upsert_one(updated);
            inner.publish(&st);
        }
        Ok(())
    }

    pub async fn mark_all_read_local(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let now = Utc::now().to_rfc3339();
            let mut st = inner.state.lock();
            let marked = st.store.mark_all_read(&now);
            st.store.set_unread_count(0);
            debug!(marked, "Marked all notifications read");
            inner.publish(&st);
        }
        inner.api.mark_all_read().await
    }

    pub async fn mark_batch_read_local(&self, ids: &[NotificationId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let inner = &self.inner;
        {
            let now = Utc::now().to_rfc3339();
            let mut st = inner.state.lock();
            let marked = ids.iter().filter(|id| st.store.mark_read(**id, &now)).count();
            st.store.decrement_unread(marked as u64);
            inner.publish(&st);
        }
        inner.api.mark_batch_read(ids).await
    }

    /// Delete on the backend, then drop the record locally.
    pub async fn delete_local(&self, id: NotificationId) -> Result<()> {
        self.inner.api.delete_one(id).await?;
        self.inner.remove_local(&[id]);
        Ok(())
    }

    pub async fn delete_batch_local(&self, ids: &[NotificationId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.inner.api.delete_batch(ids).await?;
        self.inner.remove_local(ids);
        Ok(())
    }

    /// Tear down the live session and connect again.
    pub async fn reconnect(&self) -> Result<bool> {
        info!("Reconnecting live channel");
        self.inner.live.reconnect().await
    }
}

impl Inner {
    fn publish(&self, st: &State) {
        self.snapshot.send_replace(st.snapshot());
    }

    async fn run(self: Arc<Self>, mut injections: mpsc::Receiver<NotificationRecord>, cancel: CancellationToken) {
        let mut events = self.live_events.lock().await;
        let mut ticker = self.poll.ticker();
        debug!("Notification event loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(event) = events.recv() => match event {
                    LiveEvent::Record(record) => self.add_or_update_external(record).await,
                    LiveEvent::Status(_) => {
                        // Events can lag behind the channel; the channel's own status is authoritative.
                        let status = self.live.status();
                        {
                            let mut st = self.state.lock();
                            if st.status != status {
                                st.status = status;
                                self.publish(&st);
                            }
                        }
                        ticker = self.poll.ticker();
                        trace!(status = %status, "Poll ticker reset");
                    }
                },

                Some(record) = injections.recv() => self.add_or_update_external(record).await,

                _ = ticker.tick() => self.poll_tick().await,
            }
        }
        debug!("Notification event loop stopped");
    }

    async fn refresh(&self) -> Result<()> {
        let (records, unread) = tokio::try_join!(
            self.api.list(0, self.page_size, false),
            self.api.unread_count()
        )?;
        let ids: Vec<NotificationId> = records.iter().map(|r| r.id).collect();
        let fetched = records.len();

        {
            let mut st = self.state.lock();
            st.store.set_page(records);
            st.store.set_unread_count(unread);
            st.page = 0;
            st.has_more = fetched >= self.page_size as usize;
            st.seeded = true;
            self.presenter.seed(ids);
            self.publish(&st);
        }
        debug!(fetched, unread, "Notifications refreshed");
        Ok(())
    }

    async fn add_or_update_external(&self, record: NotificationRecord) {
        let id = record.id;
        let unread = !record.is_read();
        let merged = {
            let mut st = self.state.lock();
            let outcome = st.store.upsert_one(record);
            if outcome == UpsertOutcome::Inserted && unread {
                st.store.increment_unread();
            }
            st.last_message_at = Some(Instant::now());
            self.publish(&st);
            debug!(id, ?outcome, "Merged external notification");
            st.store.get(id).cloned()
        };

        if let Some(record) = merged {
            self.presenter.display(&record).await;
        }
    }

    async fn poll_tick(&self) {
        let status = self.live.status();
        let last_message_at = {
            let mut st = self.state.lock();
            if st.status != status {
                st.status = status;
                self.publish(&st);
            }
            st.last_message_at
        };
        if !self.poll.is_stale(status, last_message_at) {
            trace!(status = %status, "Live channel fresh; skipping poll");
            return;
        }

        debug!(status = %status, "Polling notifications");
        let (unread, list) = tokio::join!(
            self.api.unread_count(),
            self.api.list(0, self.page_size, false)
        );

        let candidates = {
            let mut st = self.state.lock();
            match unread {
                Ok(count) => st.store.set_unread_count(count),
                Err(ref e) => warn!(error = %e, "Poll unread count failed"),
            }
            let candidates = match list {
                Ok(records) => {
                    let ids: Vec<NotificationId> = records.iter().map(|r| r.id).collect();
                    let summary = st.store.upsert_many(records);
                    debug!(
                        inserted = summary.inserted.len(),
                        updated = summary.updated,
                        "Poll merged notifications"
                    );
                    if st.seeded {
                        ids.into_iter()
                            .filter(|id| !self.presenter.has_displayed(*id))
                            .filter_map(|id| st.store.get(id).cloned())
                            .collect()
                    } else {
                        // No first page was seeded yet; this one is history.
                        info!(count = ids.len(), "Seeding alerted set from poll");
                        self.presenter.seed(ids);
                        st.seeded = true;
                        Vec::new()
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Poll list fetch failed");
                    Vec::new()
                }
            };
            self.publish(&st);
            candidates
        };

        for record in &candidates {
            self.presenter.display(record).await;
        }
    }

    fn remove_local(&self, ids: &[NotificationId]) {
        let mut st = self.state.lock();
        let removed = st.store.remove_many(ids);
        let unread = removed.iter().filter(|r| !r.is_read()).count();
        st.store.decrement_unread(unread as u64);
        debug!(removed = removed.len(), unread, "Removed deleted notifications");
        self.publish(&st);
    }
}
