//! Persisted session values: the bearer credential and the last registered
//! push token.
//!
//! The login flow that writes the credential lives outside this crate; the
//! notification subsystem only reads it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The persisted bearer token, if the user is logged in.
    async fn credential(&self) -> Option<String>;

    /// The push token that was last registered with the backend.
    async fn device_token(&self) -> Option<String>;

    /// Persist the push token after a successful registration.
    async fn set_device_token(&self, token: &str) -> Result<()>;
}

/// On-disk layout of [`FileSessionStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcm_token: Option<String>,
}

/// Session values held in memory only.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    data: RwLock<SessionData>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: impl Into<String>) -> Self {
        Self {
            data: RwLock::new(SessionData {
                jwt_token: Some(credential.into()),
                fcm_token: None,
            }),
        }
    }

    pub fn set_credential(&self, credential: Option<String>) {
        self.data.write().jwt_token = credential;
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn credential(&self) -> Option<String> {
        self.data.read().jwt_token.clone()
    }

    async fn device_token(&self) -> Option<String> {
        self.data.read().fcm_token.clone()
    }

    async fn set_device_token(&self, token: &str) -> Result<()> {
        self.data.write().fcm_token = Some(token.to_string());
        Ok(())
    }
}

/// Session values persisted as a JSON file.
///
/// A missing or unreadable file reads as an empty session.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> SessionData {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                debug!(path = %self.path.display(), error = %e, "Ignoring unreadable session file");
                SessionData::default()
            }),
            Err(_) => SessionData::default(),
        }
    }

    pub async fn save(&self, data: &SessionData) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn credential(&self) -> Option<String> {
        self.load().await.jwt_token.filter(|t| !t.is_empty())
    }

    async fn device_token(&self) -> Option<String> {
        self.load().await.fcm_token
    }

    async fn set_device_token(&self, token: &str) -> Result<()> {
        let mut data = self.load().await;
        data.fcm_token = Some(token.to_string());
        self.save(&data).await
    }
}
