//! Layered CLI configuration: TOML file, then `CAMPUS_NOTIFY_*` environment
//! variables, then command-line flags.

use std::path::{Path, PathBuf};

use campus_notify::NotifyConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::Args;
use crate::error::CliError;

const APP_DIR: &str = "campus-notify";

/// On-disk configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_file: Option<PathBuf>,
    #[serde(flatten)]
    notify: NotifyConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub notify: NotifyConfig,
    pub session_file: PathBuf,
    /// File the configuration was read from, if it existed.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    pub fn default_session_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_DIR).join("session.json"))
    }

    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let path = match &args.config {
            Some(path) => Some(path.clone()),
            None => Self::default_config_path(),
        };

        let (file, source) = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(&path)?;
                (parse_config(&text, &path)?, Some(path))
            }
            Some(path) if args.config.is_some() => {
                return Err(CliError::InvalidInput(format!(
                    "configuration file {} does not exist",
                    path.display()
                ))
                .into());
            }
            _ => (ConfigFile::default(), None),
        };

        let mut notify = file.notify;
        apply_env(&mut notify, |key| std::env::var(key).ok())?;
        if let Some(base_url) = &args.base_url {
            notify.base_url = base_url.clone();
        }
        notify.validate()?;

        let session_file = match (&args.session_file, file.session_file) {
            (Some(flag), _) => flag.clone(),
            (None, Some(from_file)) => from_file,
            (None, None) => Self::default_session_path().ok_or(CliError::NoHomeDirectory)?,
        };

        debug!(source = ?source, session_file = %session_file.display(), "Configuration loaded");
        Ok(Self {
            notify,
            session_file,
            source,
        })
    }

    /// Effective configuration rendered as TOML.
    pub fn show(&self) -> Result<String, CliError> {
        let file = ConfigFile {
            session_file: Some(self.session_file.clone()),
            notify: self.notify.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }
}

fn parse_config(text: &str, path: &Path) -> Result<ConfigFile, CliError> {
    toml::from_str(text).map_err(|source| CliError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `CAMPUS_NOTIFY_*` overrides for settings that have no flag.
fn apply_env(
    config: &mut NotifyConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), CliError> {
    if let Some(ws_url) = lookup("CAMPUS_NOTIFY_WS_URL") {
        config.ws_url = Some(ws_url);
    }
    if let Some(topic) = lookup("CAMPUS_NOTIFY_TOPIC") {
        config.topic = topic;
    }
    if let Some(value) = lookup("CAMPUS_NOTIFY_PAGE_SIZE") {
        config.page_size = parse_number("CAMPUS_NOTIFY_PAGE_SIZE", &value)?;
    }
    if let Some(value) = lookup("CAMPUS_NOTIFY_POLL_INTERVAL_SECS") {
        config.poll_interval_secs = parse_number("CAMPUS_NOTIFY_POLL_INTERVAL_SECS", &value)?;
    }
    if let Some(value) = lookup("CAMPUS_NOTIFY_RECONNECT_DELAY_MS") {
        config.reconnect_delay_ms = parse_number("CAMPUS_NOTIFY_RECONNECT_DELAY_MS", &value)?;
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CliError> {
    value
        .trim()
        .parse()
        .map_err(|_| CliError::InvalidInput(format!("{key} must be a number, got `{value}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_partial_file() {
        let file = parse_config(
            r#"
            base_url = "https://campus.example"
            page_size = 50
            session_file = "/tmp/session.json"
            "#,
            Path::new("config.toml"),
        )
        .unwrap();
        assert_eq!(file.notify.base_url, "https://campus.example");
        assert_eq!(file.notify.page_size, 50);
        assert_eq!(file.notify.poll_interval_secs, 45);
        assert_eq!(file.session_file, Some(PathBuf::from("/tmp/session.json")));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_config("page_size = \"many\"", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CAMPUS_NOTIFY_WS_URL", "wss://campus.example/ws/websocket"),
            ("CAMPUS_NOTIFY_PAGE_SIZE", "5"),
            ("CAMPUS_NOTIFY_RECONNECT_DELAY_MS", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = NotifyConfig::default();
        apply_env(&mut config, |key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(
            config.ws_url.as_deref(),
            Some("wss://campus.example/ws/websocket")
        );
        assert_eq!(config.page_size, 5);
        assert_eq!(config.reconnect_delay_ms, 0);
        assert_eq!(config.topic, campus_notify::config::DEFAULT_TOPIC);
    }

    #[test]
    fn test_env_rejects_non_numeric() {
        let mut config = NotifyConfig::default();
        let err = apply_env(&mut config, |key| {
            (key == "CAMPUS_NOTIFY_PAGE_SIZE").then(|| "twenty".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, CliError::InvalidInput(_)));
    }

    #[test]
    fn test_show_round_trips() {
        let config = AppConfig {
            notify: NotifyConfig::default(),
            session_file: PathBuf::from("/tmp/session.json"),
            source: None,
        };
        let text = config.show().unwrap();
        let parsed = parse_config(&text, Path::new("shown.toml")).unwrap();
        assert_eq!(parsed.notify, NotifyConfig::default());
    }
}
