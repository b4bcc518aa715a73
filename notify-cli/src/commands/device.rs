use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use campus_notify::{
    AlertPresenter, ChannelSpec, IngestionPort, PushIngestion, PushMessage, PushTokenSource,
    TokenRegistration, TokenRetryPolicy, register_device_token,
};

use super::CommandExecutor;
use super::watch::TerminalAlertPlatform;

/// Token handed over on the command line.
struct StaticTokenSource(String);

#[async_trait]
impl PushTokenSource for StaticTokenSource {
    async fn token(&self) -> campus_notify::Result<Option<String>> {
        Ok(Some(self.0.clone()).filter(|t| !t.is_empty()))
    }
}

impl CommandExecutor {
    pub async fn register_device(&self, token: &str, platform: Option<&str>) -> Result<()> {
        let gateway = self.gateway()?;
        let source = StaticTokenSource(token.to_string());
        let platform = platform.unwrap_or(self.config.notify.device_platform.as_str());
        let policy = TokenRetryPolicy {
            retries: 0,
            ..TokenRetryPolicy::from_config(&self.config.notify)
        };

        let outcome =
            register_device_token(&source, &gateway, self.session.as_ref(), &policy, platform)
                .await?;
        match outcome {
            TokenRegistration::Registered(_) => println!("Device registered ({platform})"),
            TokenRegistration::Unchanged => println!("Device token unchanged; nothing to do"),
            TokenRegistration::Unavailable => println!("No device token given"),
        }
        Ok(())
    }

    /// Run a push payload through push ingestion and print the derived record.
    pub async fn push(&self, file: &Path) -> Result<()> {
        let text = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("reading push payload {}", file.display()))?;
        let message: PushMessage = serde_json::from_str(&text)
            .with_context(|| format!("parsing push payload {}", file.display()))?;

        let presenter = Arc::new(AlertPresenter::new(
            Arc::new(TerminalAlertPlatform::new(self.output.colored())),
            ChannelSpec::from_config(&self.config.notify),
        ));
        let ingestion = PushIngestion::new(presenter, IngestionPort::new());

        match ingestion.handle_foreground(&message).await {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("Payload has no usable notification id; dropped"),
        }
        Ok(())
    }
}
