//! foris-notify
//!
//! Sends one notification per JSON blob given on the command line, through
//! the same transport the daemon is running on.

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use foris_core::{Backend, ControllerId, MqttCredentials, NotificationSender, Notifier, DEFAULT_MQTT_PORT};
use foris_router::ModuleLoader;
use foris_transport::ubus::DEFAULT_UBUS_SOCKET;
use foris_transport::unix::DEFAULT_NOTIFICATIONS_PATH;
use foris_transport::{MqttConfig, MqttNotificationSender, UbusNotificationSender, UnixNotificationSender};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "foris-notify")]
#[command(about = "Send foris-controller notifications")]
#[command(version)]
struct Cli {
    /// Module of the notification
    #[arg(short, long)]
    module: String,

    /// Action of the notification
    #[arg(short, long)]
    action: String,

    /// Skip schema validation
    #[arg(short = 'n', long)]
    no_validate: bool,

    /// Directory with external modules whose schemas are used (repeatable)
    #[arg(long = "extra-module-path")]
    extra_module_paths: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    transport: Transport,
}

#[derive(Subcommand, Debug)]
enum Transport {
    /// Send to the unix-socket daemon
    UnixSocket {
        #[arg(long, default_value = DEFAULT_NOTIFICATIONS_PATH)]
        path: PathBuf,

        /// Notification data (JSON objects)
        #[arg(required = true)]
        data: Vec<String>,
    },

    /// Send as ubus events
    Ubus {
        #[arg(long, default_value = DEFAULT_UBUS_SOCKET)]
        path: PathBuf,

        /// Notification data (JSON objects)
        #[arg(required = true)]
        data: Vec<String>,
    },

    /// Publish on an MQTT broker
    Mqtt {
        #[arg(long, default_value = "localhost")]
        host: String,

        #[arg(long, default_value_t = DEFAULT_MQTT_PORT)]
        port: u16,

        #[arg(long)]
        controller_id: ControllerId,

        /// File with `username:password`
        #[arg(long)]
        passwd_file: Option<PathBuf>,

        /// Notification data (JSON objects)
        #[arg(required = true)]
        data: Vec<String>,
    },
}

impl Transport {
    fn into_sender(self) -> Result<(Arc<dyn NotificationSender>, Vec<String>)> {
        let (sender, data): (Arc<dyn NotificationSender>, Vec<String>) = match self {
            Transport::UnixSocket { path, data } => (Arc::new(UnixNotificationSender::new(path)), data),
            Transport::Ubus { path, data } => (Arc::new(UbusNotificationSender::new(path)), data),
            Transport::Mqtt {
                host,
                port,
                controller_id,
                passwd_file,
                data,
            } => {
                let credentials = passwd_file
                    .as_deref()
                    .map(MqttCredentials::from_file)
                    .transpose()
                    .context("failed to read MQTT password file")?;
                let config = MqttConfig::new(host, port).with_credentials(credentials);
                (Arc::new(MqttNotificationSender::new(config, &controller_id)), data)
            }
        };
        Ok((sender, data))
    }
}

fn parse_blob(blob: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(blob).context("invalid JSON")?;
    if !value.is_object() {
        bail!("notification data must be a JSON object");
    }
    Ok(value)
}

async fn run(cli: Cli) -> Result<bool> {
    let validator = if cli.no_validate {
        None
    } else {
        let mut loader = ModuleLoader::new();
        for provider in foris_modules::builtin_providers_for(Backend::Mock) {
            loader.register(provider);
        }
        for path in &cli.extra_module_paths {
            loader
                .load_extra_path(path)
                .with_context(|| format!("failed to load modules from {}", path.display()))?;
        }
        Some(Arc::new(loader.build_validator().context("failed to build validator")?))
    };

    let (sender, blobs) = cli.transport.into_sender()?;
    let notifier = Notifier::new(sender, validator);

    let mut all_sent = true;
    for blob in &blobs {
        let data = match parse_blob(blob) {
            Ok(data) => data,
            Err(e) => {
                error!("Skipping '{}': {:#}", blob, e);
                all_sent = false;
                continue;
            }
        };

        match notifier.try_notify(&cli.module, &cli.action, Some(data)).await {
            Ok(()) => debug!("Sent {}/{}", cli.module, cli.action),
            Err(e) => {
                error!("Failed to send {}/{}: {}", cli.module, cli.action, e);
                all_sent = false;
            }
        }
    }

    if let Err(e) = notifier.disconnect().await {
        debug!("Disconnect failed: {}", e);
    }
    Ok(all_sent)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.debug { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foris_test_utils::{NotificationSink, SocketDir, DEFAULT_TIMEOUT};

    #[test]
    fn test_parse_cli() {
        let cli = Cli::try_parse_from([
            "foris-notify",
            "-m",
            "lan",
            "-a",
            "update_settings",
            "unix-socket",
            "--path",
            "/tmp/n.soc",
            r#"{"mode": "managed"}"#,
            r#"{"mode": "unmanaged"}"#,
        ])
        .unwrap();
        assert_eq!(cli.module, "lan");
        assert!(!cli.no_validate);
        match cli.transport {
            Transport::UnixSocket { path, data } => {
                assert_eq!(path, PathBuf::from("/tmp/n.soc"));
                assert_eq!(data.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_mqtt_needs_controller_id() {
        let base = ["foris-notify", "-m", "lan", "-a", "update_settings", "mqtt"];
        assert!(Cli::try_parse_from(base.iter().chain(&["{}"])).is_err());
        assert!(Cli::try_parse_from(
            base.iter().chain(&["--controller-id", "0000000A00000B00", "{}"])
        )
        .is_ok());
    }

    #[test]
    fn test_data_required() {
        assert!(Cli::try_parse_from(["foris-notify", "-m", "lan", "-a", "x", "ubus"]).is_err());
    }

    #[test]
    fn test_parse_blob() {
        assert!(parse_blob(r#"{"a": 1}"#).is_ok());
        assert!(parse_blob("[1]").is_err());
        assert!(parse_blob("{").is_err());
    }

    #[tokio::test]
    async fn test_run_counts_failures() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "foris-notify".to_string(),
            "-n".into(),
            "-m".into(),
            "lan".into(),
            "-a".into(),
            "update_settings".into(),
            "unix-socket".into(),
            "--path".into(),
            dir.path().join("missing.soc").display().to_string(),
            "{}".into(),
        ])
        .unwrap();
        assert!(!run(cli).await.unwrap());
    }

    #[tokio::test]
    async fn test_external_notification_reaches_socket() {
        let dir = SocketDir::new();
        let path = dir.path("notifications.sock");
        let sink = NotificationSink::start(&path);

        let payload = r#"{"severity":"error","id":"1518776436-2598","new_count":4}"#;
        let cli = Cli::try_parse_from([
            "foris-notify".to_string(),
            "--module".into(),
            "router_notifications".into(),
            "--action".into(),
            "create".into(),
            "unix-socket".into(),
            "--path".into(),
            path.display().to_string(),
            payload.into(),
        ])
        .unwrap();

        assert!(run(cli).await.unwrap());
        assert!(sink.wait_for_count(1, DEFAULT_TIMEOUT).await);

        let received = sink.messages();
        assert_eq!(received[0].module, "router_notifications");
        assert_eq!(received[0].action, "create");
        assert_eq!(received[0].data, Some(serde_json::from_str::<Value>(payload).unwrap()));
    }

    #[tokio::test]
    async fn test_invalid_blob_fails_validation() {
        let dir = SocketDir::new();
        let path = dir.path("notifications.sock");
        let sink = NotificationSink::start(&path);

        let cli = Cli::try_parse_from([
            "foris-notify".to_string(),
            "-m".into(),
            "router_notifications".into(),
            "-a".into(),
            "create".into(),
            "unix-socket".into(),
            "--path".into(),
            path.display().to_string(),
            r#"{"severity":"panic","id":"1-2","new_count":4}"#.into(),
            r#"{"severity":"news","id":"1-3","new_count":5}"#.into(),
        ])
        .unwrap();

        assert!(!run(cli).await.unwrap());
        assert!(sink.wait_for_count(1, DEFAULT_TIMEOUT).await);
        assert_eq!(sink.count(), 1);
    }
}
