use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use campus_notify::{
    AlertPlatform, AlertPresenter, ChannelSpec, HttpGateway, IngestionPort, LocalAlert,
    NotificationId, Reconciler,
};
use tracing::{debug, info, warn};

use super::CommandExecutor;
use crate::output::OutputManager;

/// Alert platform that prints alerts to the terminal.
pub struct TerminalAlertPlatform {
    output: OutputManager,
}

impl TerminalAlertPlatform {
    pub fn new(colored: bool) -> Self {
        Self {
            output: OutputManager::new(colored),
        }
    }
}

#[async_trait]
impl AlertPlatform for TerminalAlertPlatform {
    async fn request_permission(&self) -> campus_notify::Result<bool> {
        Ok(true)
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> campus_notify::Result<()> {
        debug!(channel = %spec.id, "Terminal alert channel ready");
        Ok(())
    }

    async fn display(&self, alert: &LocalAlert) -> campus_notify::Result<()> {
        println!("{}", self.output.format_alert(alert));
        Ok(())
    }
}

impl CommandExecutor {
    /// Run a reconciler session until Ctrl-C.
    pub async fn watch(&self) -> Result<()> {
        let notify = &self.config.notify;
        let gateway = Arc::new(HttpGateway::new(notify, self.session.clone())?);
        let presenter = Arc::new(AlertPresenter::new(
            Arc::new(TerminalAlertPlatform::new(self.output.colored())),
            ChannelSpec::from_config(notify),
        ));
        let reconciler = Reconciler::new(
            notify,
            gateway,
            self.session.clone(),
            presenter,
            IngestionPort::new(),
        )?;
        let mut snapshots = reconciler.subscribe();

        reconciler.start().await;
        info!(base_url = %notify.base_url, "Watching notifications; press Ctrl-C to stop");

        let initial = reconciler.snapshot();
        println!("{}", self.output.format_records(&initial.records));
        println!("{}", self.output.format_unread(initial.unread_count));

        let mut known: HashSet<NotificationId> = initial.ids().into_iter().collect();
        let mut status = initial.status;
        let mut unread = initial.unread_count;

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!(error = %e, "Failed to listen for Ctrl-C");
                    }
                    break;
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    if snapshot.status != status {
                        status = snapshot.status;
                        println!("{}", self.output.format_status(status));
                    }
                    for record in &snapshot.records {
                        if known.insert(record.id) {
                            println!("{}", self.output.format_record(record));
                        }
                    }
                    if snapshot.unread_count != unread {
                        unread = snapshot.unread_count;
                        println!("{}", self.output.format_unread(unread));
                    }
                }
            }
        }

        reconciler.stop().await;
        Ok(())
    }
}
