mod device;
mod watch;

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use campus_notify::{
    FileSessionStore, HttpGateway, NotificationApi, NotificationId, SessionStore,
};
use tracing::info;

use crate::config::AppConfig;
use crate::output::OutputManager;

/// Session store backed by the session file, with an optional credential
/// override from the command line.
pub struct CliSession {
    file: FileSessionStore,
    credential: Option<String>,
}

impl CliSession {
    pub fn new(file: FileSessionStore, credential: Option<String>) -> Self {
        Self {
            file,
            credential: credential.filter(|c| !c.is_empty()),
        }
    }
}

#[async_trait]
impl SessionStore for CliSession {
    async fn credential(&self) -> Option<String> {
        match &self.credential {
            Some(credential) => Some(credential.clone()),
            None => self.file.credential().await,
        }
    }

    async fn device_token(&self) -> Option<String> {
        self.file.device_token().await
    }

    async fn set_device_token(&self, token: &str) -> campus_notify::Result<()> {
        self.file.set_device_token(token).await
    }
}

pub struct CommandExecutor {
    config: AppConfig,
    session: Arc<dyn SessionStore>,
    output: OutputManager,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, credential: Option<String>) -> Self {
        let file = FileSessionStore::new(config.session_file.clone());
        Self {
            session: Arc::new(CliSession::new(file, credential)),
            output: OutputManager::new(std::io::stdout().is_terminal()),
            config,
        }
    }

    fn gateway(&self) -> Result<HttpGateway> {
        Ok(HttpGateway::new(&self.config.notify, self.session.clone())?)
    }

    pub async fn list(
        &self,
        page: u32,
        size: Option<u32>,
        unread_only: bool,
        json: bool,
    ) -> Result<()> {
        let size = size.unwrap_or(self.config.notify.page_size);
        let records = self.gateway()?.list(page, size, unread_only).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else {
            println!("{}", self.output.format_records(&records));
        }
        Ok(())
    }

    pub async fn unread(&self) -> Result<()> {
        let count = self.gateway()?.unread_count().await?;
        println!("{}", self.output.format_unread(count));
        Ok(())
    }

    pub async fn read(&self, id: NotificationId) -> Result<()> {
        let record = self.gateway()?.mark_read(id).await?;
        println!("{}", self.output.format_record(&record));
        Ok(())
    }

    pub async fn read_all(&self) -> Result<()> {
        self.gateway()?.mark_all_read().await?;
        println!("All notifications marked read");
        Ok(())
    }

    pub async fn read_batch(&self, ids: &[NotificationId]) -> Result<()> {
        self.gateway()?.mark_batch_read(ids).await?;
        println!("Marked {} notifications read", ids.len());
        Ok(())
    }

    pub async fn delete(&self, ids: &[NotificationId]) -> Result<()> {
        let gateway = self.gateway()?;
        match ids {
            [id] => gateway.delete_one(*id).await?,
            _ => gateway.delete_batch(ids).await?,
        }
        info!(count = ids.len(), "Deleted notifications");
        println!("Deleted {} notifications", ids.len());
        Ok(())
    }

    pub fn show_config(&self) -> Result<()> {
        if let Some(source) = &self.config.source {
            println!("# loaded from {}", source.display());
        }
        print!("{}", self.config.show()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cli_session_prefers_override() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileSessionStore::new(dir.path().join("session.json"));
        let session = CliSession::new(file.clone(), Some("flag-token".to_string()));
        assert_eq!(session.credential().await.as_deref(), Some("flag-token"));

        let session = CliSession::new(file, Some(String::new()));
        assert_eq!(session.credential().await, None);
    }

    #[tokio::test]
    async fn test_cli_session_persists_device_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let session = CliSession::new(FileSessionStore::new(&path), None);

        session.set_device_token("device-1").await.unwrap();
        assert_eq!(session.device_token().await.as_deref(), Some("device-1"));
        assert!(path.exists());
    }
}
