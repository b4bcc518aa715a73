use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::LiveEvent;
use super::status::{ConnectionStatus, StatusTracker};
use super::stomp::{Command, Frame, decode_frames, negotiate_heartbeat};
use crate::config::NotifyConfig;
use crate::error::{NotifyError, Result};
use crate::model::NotificationRecord;
use crate::session::SessionStore;
use crate::tls::install_rustls_provider;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time allowed for the websocket upgrade and for the STOMP CONNECTED reply.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for a torn-down session to send DISCONNECT before it is aborted.
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

const SUBSCRIPTION_ID: &str = "sub-0";

#[derive(Debug, Clone)]
pub struct LiveChannelConfig {
    pub url: Url,
    pub topic: String,
    /// Fixed delay before the transport reconnects on its own. `None` disables it.
    pub reconnect_delay: Option<Duration>,
    /// Heart-beat interval offered in CONNECT. Zero declines heart-beats.
    pub heartbeat: Duration,
    pub handshake_timeout: Duration,
}

impl LiveChannelConfig {
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        Ok(Self {
            url: config.websocket_url()?,
            topic: config.topic.clone(),
            reconnect_delay: config.reconnect_delay(),
            heartbeat: config.heartbeat(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }
}

/// Handle to the running transport task. Dropping it tears the session down.
struct ActiveSession {
    id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Persistent STOMP subscription to the per-user notification topic.
///
/// At most one transport task exists at a time; [`reconnect`](Self::reconnect)
/// is the only way to replace it.
pub struct LiveChannel {
    config: Arc<LiveChannelConfig>,
    session: Arc<dyn SessionStore>,
    status: StatusTracker,
    events: mpsc::Sender<LiveEvent>,
    active: Mutex<Option<ActiveSession>>,
}

impl LiveChannel {
    pub fn new(
        config: LiveChannelConfig,
        session: Arc<dyn SessionStore>,
        events: mpsc::Sender<LiveEvent>,
    ) -> Self {
        install_rustls_provider();
        Self {
            config: Arc::new(config),
            session,
            status: StatusTracker::new(events.clone()),
            events,
            active: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Start a session.
    ///
    /// Returns `Ok(false)` and stays idle when no credential is stored.
    /// Calling it while a session is running is a no-op returning `Ok(true)`.
    pub async fn connect(&self) -> Result<bool> {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|s| !s.task.is_finished()) {
            return Ok(true);
        }
        // A finished task leaves its handle behind; drop it before starting over.
        active.take();

        let Some(credential) = self.session.credential().await else {
            debug!("No credential stored; live channel stays idle");
            return Ok(false);
        };

        self.status.transition(ConnectionStatus::Connecting)?;

        let cancel = CancellationToken::new();
        let transport = Transport {
            id: format!("live-{}", uuid::Uuid::new_v4()),
            config: self.config.clone(),
            session: self.session.clone(),
            status: self.status.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        let id = transport.id.clone();
        let task = tokio::spawn(transport.run(credential));

        info!(session = %id, url = %self.config.url, "Live channel connecting");
        *active = Some(ActiveSession { id, cancel, task });
        Ok(true)
    }

    /// Tear down any existing session, then connect again.
    pub async fn reconnect(&self) -> Result<bool> {
        self.disconnect().await;
        self.connect().await
    }

    /// Tear down the session, if any, and return to `Idle`. Idempotent.
    pub async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        if let Some(mut session) = active.take() {
            session.cancel.cancel();
            if timeout(TEARDOWN_GRACE, &mut session.task).await.is_err() {
                debug!(session = %session.id, "Live session did not stop in time; aborting");
            }
            debug!(session = %session.id, "Live session torn down");
        }
        if let Err(e) = self.status.transition(ConnectionStatus::Idle) {
            warn!(error = %e, "Failed to mark live channel idle");
        }
    }
}

enum SessionEnd {
    Cancelled,
    Closed,
}

struct Transport {
    id: String,
    config: Arc<LiveChannelConfig>,
    session: Arc<dyn SessionStore>,
    status: StatusTracker,
    events: mpsc::Sender<LiveEvent>,
    cancel: CancellationToken,
}

impl Transport {
    async fn run(self, mut credential: String) {
        loop {
            match self.run_session(&credential).await {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::Closed) => info!(session = %self.id, "Live channel closed"),
                Err(e) => warn!(session = %self.id, error = %e, "Live channel session failed"),
            }
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_status(ConnectionStatus::Error);

            let Some(delay) = self.config.reconnect_delay else {
                break;
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }

            match self.session.credential().await {
                Some(latest) => credential = latest,
                None => {
                    debug!(session = %self.id, "Credential gone; live channel going idle");
                    self.set_status(ConnectionStatus::Idle);
                    break;
                }
            }
            debug!(session = %self.id, delay_ms = delay.as_millis() as u64, "Live channel reconnecting");
            self.set_status(ConnectionStatus::Connecting);
        }
        debug!(session = %self.id, "Live transport task stopped");
    }

    fn set_status(&self, next: ConnectionStatus) {
        if let Err(e) = self.status.transition_unless_cancelled(next, &self.cancel) {
            warn!(session = %self.id, error = %e, "Live channel status not updated");
        }
    }

    async fn run_session(&self, credential: &str) -> Result<SessionEnd> {
        let request = self.config.url.as_str().into_client_request()?;
        let connect = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            result = timeout(self.config.handshake_timeout, connect_async(request)) => result,
        };
        let (mut ws, _) = connect.map_err(|_| NotifyError::Timeout("websocket handshake"))??;

        let host = self.config.url.host_str().unwrap_or("localhost");
        let connect_frame = Frame::connect(host, credential, self.config.heartbeat);
        ws.send(Message::text(connect_frame.encode())).await?;

        let connected = tokio::select! {
            _ = self.cancel.cancelled() => {
                let _ = ws.close(None).await;
                return Ok(SessionEnd::Cancelled);
            }
            result = timeout(self.config.handshake_timeout, await_connected(&mut ws)) => {
                result.map_err(|_| NotifyError::Timeout("STOMP CONNECTED"))??
            }
        };

        let heartbeat = negotiate_heartbeat(self.config.heartbeat, connected.get("heart-beat"));
        let subscribe = Frame::subscribe(SUBSCRIPTION_ID, &self.config.topic);
        ws.send(Message::text(subscribe.encode())).await?;

        self.status
            .transition_unless_cancelled(ConnectionStatus::Connected, &self.cancel)?;
        info!(session = %self.id, topic = %self.config.topic, "Live channel subscribed");

        let period = heartbeat.unwrap_or(Duration::from_secs(60));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    let _ = ws.send(Message::text(Frame::disconnect().encode())).await;
                    let _ = ws.close(None).await;
                    return Ok(SessionEnd::Cancelled);
                }

                _ = ticker.tick(), if heartbeat.is_some() => {
                    ws.send(Message::text("\n")).await?;
                    trace!(session = %self.id, "Sent STOMP heart-beat");
                }

                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str())?,
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.handle_text(text)?,
                        Err(_) => debug!(session = %self.id, "Dropping non-UTF-8 binary message"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(session = %self.id, ?frame, "Server closed live channel");
                        return Ok(SessionEnd::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::Closed),
                },
            }
        }
    }

    fn handle_text(&self, text: &str) -> Result<()> {
        let frames = match decode_frames(text) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Dropping malformed STOMP message");
                return Ok(());
            }
        };

        for frame in frames {
            match frame.command {
                Command::Message => self.forward_record(&frame),
                Command::Error => return Err(stomp_error(&frame)),
                Command::Receipt | Command::Connected => {}
                other => debug!(session = %self.id, command = %other, "Ignoring STOMP frame"),
            }
        }
        Ok(())
    }

    fn forward_record(&self, frame: &Frame) {
        match serde_json::from_str::<NotificationRecord>(&frame.body) {
            Ok(record) => {
                debug!(session = %self.id, id = record.id, "Live notification received");
                let id = record.id;
                match self.events.try_send(LiveEvent::Record(record)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(session = %self.id, id, "Live event queue full; dropping record");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(session = %self.id, "Live event receiver gone");
                    }
                }
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "Dropping malformed live payload");
            }
        }
    }
}

/// Read until the server answers CONNECT.
async fn await_connected(ws: &mut WsStream) -> Result<Frame> {
    while let Some(msg) = ws.next().await {
        let text = match msg? {
            Message::Text(text) => text.as_str().to_string(),
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };
        for frame in decode_frames(&text)? {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => return Err(stomp_error(&frame)),
                other => debug!(command = %other, "Unexpected frame before CONNECTED"),
            }
        }
    }
    Err(NotifyError::Stomp(
        "socket closed before CONNECTED".to_string(),
    ))
}

fn stomp_error(frame: &Frame) -> NotifyError {
    let message = frame
        .get("message")
        .filter(|m| !m.is_empty())
        .unwrap_or(frame.body.as_str());
    NotifyError::Stomp(message.to_string())
}
