//! foris-controller daemon
//!
//! Loads the modules, builds the shared context and serves requests on the
//! selected transport until SIGINT/SIGTERM.

mod cli;
mod config;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use cli::{Cli, CommonArgs, MqttArgs, Transport};
use config::DaemonConfig;
use foris_core::{Context, ControllerId, MqttCredentials, Notifier, Validator, ZeroconfConfig};
use foris_discovery::ZeroconfAnnouncer;
use foris_router::{ModuleContext, ModuleLoader, Router};
use foris_transport::ubus::{plan_workers, set_parent_death_signal, WorkerSupervisor};
use foris_transport::{
    ClientBridge, MqttConfig, MqttListener, MqttNotificationSender, MqttRequestSender,
    RequestSender, UbusListener, UbusNotificationSender, UbusRequestSender,
    UnixNotificationSender, UnixRequestSender, UnixSocketListener,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn setup_logging(debug: bool, log_file: Option<&Path>, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file));
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        None => {
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
    }
    Ok(())
}

/// Completes on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

fn seconds(value: f64, what: &str) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        bail!("{} must be a non-negative number of seconds, got {}", what, value);
    }
    Ok(Duration::from_secs_f64(value))
}

/// Command-line values resolved against the optional config file
struct Settings {
    modules: Option<BTreeSet<String>>,
    extra_module_paths: Vec<PathBuf>,
    announcer_period: Option<f64>,
    client_socket_path: Option<PathBuf>,
    client_socket_timeout: Option<Duration>,
}

impl Settings {
    fn resolve(common: &CommonArgs, file: DaemonConfig, announcer_period: Option<f64>) -> Result<Self> {
        let modules = if !common.modules.is_empty() {
            Some(common.modules.iter().cloned().collect())
        } else {
            file.modules.map(|m| m.into_iter().collect())
        };

        let mut extra_module_paths = file.extra_module_paths;
        extra_module_paths.extend(common.extra_module_paths.iter().cloned());

        let client_socket_timeout = common
            .client_socket_timeout
            .or(file.client_socket_timeout)
            .map(|t| seconds(t, "client socket timeout"))
            .transpose()?;

        Ok(Self {
            modules,
            extra_module_paths,
            announcer_period: announcer_period.or(file.announcer_period),
            client_socket_path: common.client_socket_path.clone().or(file.client_socket_path),
            client_socket_timeout,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.common.debug, cli.common.log_file.as_deref(), cli.common.json_logs)?;

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let file = match &cli.common.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    let announcer_period = match &cli.transport {
        Transport::Mqtt(args) => args.announcer_period,
        _ => None,
    };
    let settings = Settings::resolve(&cli.common, file, announcer_period)?;
    let backend = cli.common.backend;

    info!("Starting foris-controller {} ({} backend)", env!("CARGO_PKG_VERSION"), backend);

    let mut loader = ModuleLoader::new();
    for provider in foris_modules::builtin_providers_for(backend) {
        loader.register(provider);
    }
    for path in &settings.extra_module_paths {
        loader
            .load_extra_path(path)
            .with_context(|| format!("failed to load modules from {}", path.display()))?;
    }
    let validator = Arc::new(loader.build_validator().context("failed to build validator")?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    match cli.transport.clone() {
        Transport::UnixSocket {
            path,
            notifications_path,
        } => {
            let notifier = Notifier::new(
                Arc::new(UnixNotificationSender::new(notifications_path)),
                Some(validator.clone()),
            );
            let router = build_router(&loader, &settings, backend, validator, &notifier)?;
            let bridge = spawn_bridge(
                &settings,
                Box::new(UnixRequestSender::new(&path)),
                &notifier,
                &shutdown_rx,
            );

            info!("Listening on unix socket {}", path.display());
            let result = UnixSocketListener::new(path, router, notifier.clone())
                .serve(shutdown_rx)
                .await;
            finish(result.map_err(Into::into), bridge, &notifier).await
        }

        Transport::Ubus { path, single } => {
            let notifier = Notifier::new(
                Arc::new(UbusNotificationSender::new(&path)),
                Some(validator.clone()),
            );
            let bridge = spawn_bridge(
                &settings,
                Box::new(UbusRequestSender::new(&path)),
                &notifier,
                &shutdown_rx,
            );

            let enabled: Vec<String> = loader
                .names()
                .filter(|name| settings.modules.as_ref().map_or(true, |m| m.contains(*name)))
                .map(str::to_string)
                .collect();
            let plan = plan_workers(&enabled, single);

            let exe = std::env::current_exe().context("failed to locate own executable")?;
            let mut base_args = cli.common.worker_args(&cli.common.extra_module_paths);
            if let Some(config) = &cli.common.config {
                base_args.push("--config".into());
                base_args.push(config.into());
            }
            base_args.push("ubus-worker".into());
            base_args.push("--path".into());
            base_args.push(path.into());

            info!("Starting {} ubus worker(s)", plan.len());
            let result = WorkerSupervisor::new(exe, base_args, plan)
                .run(shutdown_rx)
                .await;
            finish(result.map_err(Into::into), bridge, &notifier).await
        }

        Transport::UbusWorker { path } => {
            set_parent_death_signal().context("failed to bind worker to its parent")?;

            let notifier = Notifier::new(
                Arc::new(UbusNotificationSender::new(&path)),
                Some(validator.clone()),
            );
            let router = build_router(&loader, &settings, backend, validator, &notifier)?;
            let modules = router
                .registry()
                .list_modules(None)
                .into_iter()
                .map(|(name, _)| name.to_string())
                .collect();

            let result = UbusListener::new(path, router, modules)
                .serve(shutdown_rx)
                .await;
            finish(result.map_err(Into::into), None, &notifier).await
        }

        Transport::Mqtt(args) => {
            let context = Arc::new(mqtt_context(&args, &settings, backend, validator.clone())?);
            let config = MqttConfig::new(&args.host, args.port)
                .with_credentials(context.mqtt_credentials.clone());

            let notifier = Notifier::new(
                Arc::new(MqttNotificationSender::new(config.clone(), &context.controller_id)),
                Some(validator.clone()),
            );
            let router = build_router(&loader, &settings, backend, validator, &notifier)?;
            let bridge = spawn_bridge(
                &settings,
                Box::new(MqttRequestSender::new(&config, &context.controller_id)),
                &notifier,
                &shutdown_rx,
            );

            let _zeroconf = context
                .zeroconf
                .as_ref()
                .and_then(|zc| ZeroconfAnnouncer::try_start(&context.controller_id, zc));

            info!(
                "Controller {} connecting to MQTT broker {}:{}",
                context.controller_id, args.host, args.port
            );
            let result = MqttListener::new(config, context, router)
                .serve(shutdown_rx)
                .await;
            finish(result.map_err(Into::into), bridge, &notifier).await
        }
    }
}

fn build_router(
    loader: &ModuleLoader,
    settings: &Settings,
    backend: foris_core::Backend,
    validator: Arc<Validator>,
    notifier: &Notifier,
) -> Result<Router> {
    let ctx = ModuleContext::new(backend, notifier.clone());
    let registry = loader
        .instantiate(&ctx, settings.modules.as_ref())
        .context("failed to instantiate modules")?;
    Ok(Router::new(Arc::new(registry), validator))
}

fn mqtt_context(
    args: &MqttArgs,
    settings: &Settings,
    backend: foris_core::Backend,
    validator: Arc<Validator>,
) -> Result<Context> {
    let controller_id = args.controller_id.clone().unwrap_or_else(ControllerId::generate);

    let credentials = args
        .passwd_file
        .as_deref()
        .map(MqttCredentials::from_file)
        .transpose()
        .context("failed to read MQTT password file")?;

    let zeroconf = args.zeroconf_enabled.then(|| ZeroconfConfig {
        devices: args.zeroconf_devices.clone(),
        port: args.zeroconf_port.unwrap_or(args.port),
    });

    let mut context = Context::new(controller_id, backend, validator)
        .with_mqtt_credentials(credentials)
        .with_module_filter(settings.modules.clone())
        .with_zeroconf(zeroconf);
    if let Some(period) = settings.announcer_period {
        context = context
            .with_announcer_period(period)
            .context("invalid announcer period")?;
    }
    Ok(context)
}

fn spawn_bridge(
    settings: &Settings,
    sender: Box<dyn RequestSender>,
    notifier: &Notifier,
    shutdown: &watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let path = settings.client_socket_path.clone()?;
    let bridge = ClientBridge::new(sender, notifier.clone(), settings.client_socket_timeout);
    let shutdown = shutdown.clone();

    info!("Client bridge listening on {}", path.display());
    Some(tokio::spawn(async move {
        if let Err(e) = bridge.serve(path, shutdown).await {
            error!("Client bridge failed: {}", e);
        }
    }))
}

async fn finish(
    result: Result<()>,
    bridge: Option<tokio::task::JoinHandle<()>>,
    notifier: &Notifier,
) -> Result<()> {
    if let Some(bridge) = bridge {
        if result.is_err() {
            bridge.abort();
        }
        let _ = bridge.await;
    }
    if let Err(e) = notifier.disconnect().await {
        warn!("Failed to disconnect notification sender: {}", e);
    }
    info!("foris-controller stopped");
    result
}
