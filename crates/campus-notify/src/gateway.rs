//! REST gateway for the backend's notification API.
//!
//! The gateway is stateless apart from its HTTP client: every call reads the
//! bearer credential, issues one request and maps the response. Failures are
//! returned to the caller and never retried here.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::config::NotifyConfig;
use crate::error::{NotifyError, Result};
use crate::model::{NotificationId, NotificationRecord};
use crate::session::SessionStore;
use crate::tls::install_rustls_provider;

/// Envelope keys the backend has been seen to wrap list responses in, in
/// lookup order.
const ENVELOPE_KEYS: [&str; 4] = ["content", "records", "notificationList", "data"];

/// Backend notification operations.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Fetch one page of notifications, newest first.
    async fn list(
        &self,
        page: u32,
        size: u32,
        unread_only: bool,
    ) -> Result<Vec<NotificationRecord>>;

    /// Authoritative unread counter.
    async fn unread_count(&self) -> Result<u64>;

    /// Mark one notification read, returning the updated record.
    async fn mark_read(&self, id: NotificationId) -> Result<NotificationRecord>;

    async fn mark_all_read(&self) -> Result<()>;

    async fn mark_batch_read(&self, ids: &[NotificationId]) -> Result<()>;

    async fn delete_one(&self, id: NotificationId) -> Result<()>;

    async fn delete_batch(&self, ids: &[NotificationId]) -> Result<()>;

    /// Register a platform push token for the current user.
    async fn register_device(&self, token: &str, platform: &str) -> Result<()>;
}

/// [`NotificationApi`] over HTTP.
pub struct HttpGateway {
    client: Client,
    root: String,
    session: Arc<dyn SessionStore>,
}

impl HttpGateway {
    pub fn new(config: &NotifyConfig, session: Arc<dyn SessionStore>) -> Result<Self> {
        install_rustls_provider();

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Self::with_client(client, config, session)
    }

    /// Build a gateway around an existing client.
    pub fn with_client(
        client: Client,
        config: &NotifyConfig,
        session: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let root = config.notifications_url()?.as_str().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            root,
            session,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.root, path)
    }

    async fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let token = self
            .session
            .credential()
            .await
            .ok_or(NotifyError::NoCredential)?;
        Ok(builder.bearer_auth(token))
    }

    async fn send(&self, builder: RequestBuilder, operation: &'static str) -> Result<Response> {
        let response = self.authorized(builder).await?.send().await?;
        let status = response.status();
        trace!(operation, %status, "Notification API response");
        if !status.is_success() {
            return Err(NotifyError::fetch_failed(operation, status));
        }
        Ok(response)
    }
}

#[async_trait]
impl NotificationApi for HttpGateway {
    async fn list(
        &self,
        page: u32,
        size: u32,
        unread_only: bool,
    ) -> Result<Vec<NotificationRecord>> {
        let request = self.client.get(self.url("")).query(&[
            ("unreadOnly", unread_only.to_string()),
            ("page", page.to_string()),
            ("size", size.to_string()),
        ]);
        let body: Value = self.send(request, "list").await?.json().await?;
        let records = extract_list(body);
        debug!(page, size, count = records.len(), "Fetched notification page");
        Ok(records)
    }

    async fn unread_count(&self) -> Result<u64> {
        let request = self.client.get(self.url("/unread-count"));
        let text = self.send(request, "unread-count").await?.text().await?;
        parse_unread_count(&text)
            .ok_or_else(|| NotifyError::malformed(format!("unread count body `{text}`")))
    }

    async fn mark_read(&self, id: NotificationId) -> Result<NotificationRecord> {
        let request = self.client.post(self.url(&format!("/{id}/read")));
        let record = self.send(request, "mark-read").await?.json().await?;
        Ok(record)
    }

    async fn mark_all_read(&self) -> Result<()> {
        let request = self.client.post(self.url("/mark-all-read"));
        self.send(request, "mark-all-read").await?;
        Ok(())
    }

    async fn mark_batch_read(&self, ids: &[NotificationId]) -> Result<()> {
        let request = self
            .client
            .post(self.url("/mark-read-batch"))
            .json(&json!({ "ids": ids }));
        self.send(request, "mark-read-batch").await?;
        Ok(())
    }

    async fn delete_one(&self, id: NotificationId) -> Result<()> {
        let request = self.client.delete(self.url(&format!("/{id}")));
        self.send(request, "delete").await?;
        Ok(())
    }

    async fn delete_batch(&self, ids: &[NotificationId]) -> Result<()> {
        let request = self
            .client
            .post(self.url("/delete-batch"))
            .json(&json!({ "ids": ids }));
        self.send(request, "delete-batch").await?;
        Ok(())
    }

    async fn register_device(&self, token: &str, platform: &str) -> Result<()> {
        let request = self
            .client
            .post(self.url("/register-device"))
            .json(&json!({ "token": token, "platform": platform }));
        self.send(request, "register-device").await?;
        Ok(())
    }
}

/// Unwrap a list response.
///
/// Accepts a bare array or an object wrapping the array under one of the
/// known envelope keys. Any other shape yields an empty list. Falsy entries
/// and entries that do not carry a numeric id are dropped.
pub fn extract_list(body: Value) -> Vec<NotificationRecord> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => ENVELOPE_KEYS
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter(is_truthy)
        .filter_map(|item| match serde_json::from_value::<NotificationRecord>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(error = %e, "Dropping malformed notification entry");
                None
            }
        })
        .collect()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Parse the unread-count body.
///
/// The backend answers either `{"unreadCount": N}` or the bare number as
/// text. JSON is tried first, then numeric coercion of the same text. An
/// empty body reads as zero.
pub fn parse_unread_count(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let candidate = match &value {
            Value::Object(map) => map.get("unreadCount"),
            other => Some(other),
        };
        if let Some(count) = candidate.and_then(count_from_value) {
            return Some(count);
        }
    }
    coerce_count(trimmed)
}

fn count_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => coerce_count(s.trim()),
        _ => None,
    }
}

fn coerce_count(text: &str) -> Option<u64> {
    if text.is_empty() {
        return Some(0);
    }
    text.parse::<u64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use axum::{
        Json, Router,
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode},
        routing::{delete, get, post},
    };
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Captured {
        authorization: Vec<String>,
        queries: Vec<HashMap<String, String>>,
        bodies: Vec<Value>,
        paths: Vec<String>,
    }

    type Shared = Arc<Mutex<Captured>>;

    fn auth(headers: &HeaderMap) -> String {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn list_handler(
        State(captured): State<Shared>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        let mut guard = captured.lock();
        guard.authorization.push(auth(&headers));
        guard.queries.push(query);
        Json(json!([{ "id": 1, "message": "a" }, { "id": 2, "message": "b" }]))
    }

    async fn mark_read_handler(
        State(captured): State<Shared>,
        headers: HeaderMap,
        Path(id): Path<i64>,
    ) -> Json<Value> {
        let mut guard = captured.lock();
        guard.authorization.push(auth(&headers));
        guard.paths.push(format!("read/{id}"));
        Json(json!({ "id": id, "message": "ok", "readAt": "2024-03-01T00:00:00Z" }))
    }

    async fn delete_handler(State(captured): State<Shared>, Path(id): Path<i64>) -> StatusCode {
        captured.lock().paths.push(format!("delete/{id}"));
        StatusCode::NO_CONTENT
    }

    async fn body_handler(State(captured): State<Shared>, Json(body): Json<Value>) -> StatusCode {
        captured.lock().bodies.push(body);
        StatusCode::OK
    }

    async fn mark_all_handler(State(captured): State<Shared>) -> StatusCode {
        captured.lock().paths.push("mark-all-read".into());
        StatusCode::OK
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn backend() -> (HttpGateway, Shared) {
        let captured: Shared = Arc::default();
        let router = Router::new()
            .route("/api/notifications", get(list_handler))
            .route("/api/notifications/unread-count", get(|| async { "5" }))
            .route("/api/notifications/{id}/read", post(mark_read_handler))
            .route("/api/notifications/{id}", delete(delete_handler))
            .route("/api/notifications/mark-all-read", post(mark_all_handler))
            .route("/api/notifications/mark-read-batch", post(body_handler))
            .route("/api/notifications/delete-batch", post(body_handler))
            .route("/api/notifications/register-device", post(body_handler))
            .with_state(captured.clone());
        let base = serve(router).await;

        let config = NotifyConfig::default().with_base_url(base);
        let session = Arc::new(MemorySessionStore::with_credential("UNIT_JWT"));
        (HttpGateway::new(&config, session).unwrap(), captured)
    }

    #[test]
    fn test_extract_list_bare_array() {
        let records = extract_list(json!([{ "id": 1 }, { "id": 2 }]));
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_extract_list_envelopes() {
        for key in ENVELOPE_KEYS {
            let mut envelope = serde_json::Map::new();
            envelope.insert(key.to_string(), json!([{ "id": 3 }, { "id": 4 }]));
            let records = extract_list(Value::Object(envelope));
            assert_eq!(
                records.iter().map(|r| r.id).collect::<Vec<_>>(),
                vec![3, 4],
                "envelope {key}"
            );
        }
    }

    #[test]
    fn test_extract_list_skips_non_array_envelope_values() {
        let records = extract_list(json!({ "content": null, "records": [{ "id": 8 }] }));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 8);
    }

    #[test]
    fn test_extract_list_unknown_shape_is_empty() {
        assert!(extract_list(json!({ "foo": 1 })).is_empty());
        assert!(extract_list(json!("nope")).is_empty());
        assert!(extract_list(Value::Null).is_empty());
    }

    #[test]
    fn test_extract_list_filters_falsy_and_malformed() {
        let records = extract_list(json!([null, { "id": 1 }, false, 0, "", { "title": "no id" }]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 1);
    }

    #[test]
    fn test_parse_unread_count() {
        assert_eq!(parse_unread_count(r#"{"unreadCount":7}"#), Some(7));
        assert_eq!(parse_unread_count("5"), Some(5));
        assert_eq!(parse_unread_count(" 12\n"), Some(12));
        assert_eq!(parse_unread_count(r#""3""#), Some(3));
        assert_eq!(parse_unread_count(r#"{"unreadCount":"4"}"#), Some(4));
        assert_eq!(parse_unread_count(""), Some(0));
        assert_eq!(parse_unread_count("many"), None);
        assert_eq!(parse_unread_count(r#"{"count":2}"#), None);
    }

    #[tokio::test]
    async fn test_list_sends_bearer_and_query() {
        let (gateway, captured) = backend().await;

        let records = gateway.list(1, 10, true).await.unwrap();
        assert_eq!(records.len(), 2);

        let guard = captured.lock();
        assert_eq!(guard.authorization, vec!["Bearer UNIT_JWT".to_string()]);
        let query = &guard.queries[0];
        assert_eq!(query.get("unreadOnly").map(String::as_str), Some("true"));
        assert_eq!(query.get("page").map(String::as_str), Some("1"));
        assert_eq!(query.get("size").map(String::as_str), Some("10"));
    }

    #[tokio::test]
    async fn test_unread_count_over_http() {
        let (gateway, _) = backend().await;
        assert_eq!(gateway.unread_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_unread_count_non_success_is_fetch_failed() {
        let router = Router::new().route(
            "/api/notifications/unread-count",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "") }),
        );
        let base = serve(router).await;
        let config = NotifyConfig::default().with_base_url(base);
        let gateway =
            HttpGateway::new(&config, Arc::new(MemorySessionStore::with_credential("t"))).unwrap();

        match gateway.unread_count().await {
            Err(NotifyError::FetchFailed { operation, status }) => {
                assert_eq!(operation, "unread-count");
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            }
            other => panic!("expected FetchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mark_read_returns_updated_record() {
        let (gateway, captured) = backend().await;
        let record = gateway.mark_read(9).await.unwrap();
        assert_eq!(record.id, 9);
        assert!(record.is_read());

        let guard = captured.lock();
        assert_eq!(guard.paths, vec!["read/9".to_string()]);
        assert_eq!(guard.authorization, vec!["Bearer UNIT_JWT".to_string()]);
    }

    #[tokio::test]
    async fn test_mark_all_read_and_delete_one() {
        let (gateway, captured) = backend().await;
        gateway.mark_all_read().await.unwrap();
        gateway.delete_one(5).await.unwrap();
        assert_eq!(
            captured.lock().paths,
            vec!["mark-all-read".to_string(), "delete/5".to_string()]
        );
    }

    #[tokio::test]
    async fn test_batch_bodies() {
        let (gateway, captured) = backend().await;
        gateway.delete_batch(&[1, 2, 3]).await.unwrap();
        gateway.mark_batch_read(&[4]).await.unwrap();
        gateway.register_device("fcm-token", "ANDROID").await.unwrap();

        let guard = captured.lock();
        assert_eq!(guard.bodies[0], json!({ "ids": [1, 2, 3] }));
        assert_eq!(guard.bodies[1], json!({ "ids": [4] }));
        assert_eq!(
            guard.bodies[2],
            json!({ "token": "fcm-token", "platform": "ANDROID" })
        );
    }

    #[tokio::test]
    async fn test_missing_credential_is_hard_error() {
        let config = NotifyConfig::default().with_base_url("http://127.0.0.1:9");
        let gateway = HttpGateway::new(&config, Arc::new(MemorySessionStore::new())).unwrap();
        assert!(matches!(
            gateway.list(0, 20, false).await,
            Err(NotifyError::NoCredential)
        ));
    }
}
