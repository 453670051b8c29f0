//! Command-line interface

use clap::{Args, Parser, Subcommand};
use foris_core::{Backend, ControllerId, DEFAULT_MQTT_PORT, ENV_ANNOUNCER_PERIOD};
use foris_transport::ubus::DEFAULT_UBUS_SOCKET;
use foris_transport::unix::{DEFAULT_NOTIFICATIONS_PATH, DEFAULT_SOCKET_PATH};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "foris-controller")]
#[command(about = "Configuration message router for Turris routers")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub transport: Transport,
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Handler implementation (mock or openwrt)
    #[arg(long)]
    pub backend: Backend,

    /// Enable only this module (repeatable)
    #[arg(short = 'm', long = "module", global = true)]
    pub modules: Vec<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Directory with external modules (repeatable)
    #[arg(long = "extra-module-path", global = true)]
    pub extra_module_paths: Vec<PathBuf>,

    /// Expose a client-bridge socket at this path
    #[arg(short = 'C', long, global = true)]
    pub client_socket_path: Option<PathBuf>,

    /// Seconds to wait for a bridged reply (default: forever)
    #[arg(long, global = true)]
    pub client_socket_timeout: Option<f64>,

    /// TOML configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Transport {
    /// Serve requests on a unix stream socket
    UnixSocket {
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        path: PathBuf,

        /// Socket receiving notifications
        #[arg(long, default_value = DEFAULT_NOTIFICATIONS_PATH)]
        notifications_path: PathBuf,
    },

    /// Serve requests on ubus
    Ubus {
        /// ubusd socket
        #[arg(long, default_value = DEFAULT_UBUS_SOCKET)]
        path: PathBuf,

        /// Serve every module from one worker process
        #[arg(long)]
        single: bool,
    },

    /// Serve requests over an MQTT broker
    Mqtt(MqttArgs),

    /// One ubus worker process (started by the daemon)
    #[command(hide = true)]
    UbusWorker {
        #[arg(long, default_value = DEFAULT_UBUS_SOCKET)]
        path: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct MqttArgs {
    #[arg(long, default_value = "localhost")]
    pub host: String,

    #[arg(long, default_value_t = DEFAULT_MQTT_PORT)]
    pub port: u16,

    /// 16 uppercase hex digits (generated when absent)
    #[arg(long)]
    pub controller_id: Option<ControllerId>,

    /// File with `username:password`
    #[arg(long)]
    pub passwd_file: Option<PathBuf>,

    /// Seconds between advertizements (0 disables periodic ones)
    #[arg(long, env = ENV_ANNOUNCER_PERIOD)]
    pub announcer_period: Option<f64>,

    /// Announce the broker over mDNS
    #[arg(long)]
    pub zeroconf_enabled: bool,

    /// Interfaces to announce on (default: all)
    #[arg(long, num_args = 1..)]
    pub zeroconf_devices: Vec<String>,

    /// Port to announce (default: --port)
    #[arg(long)]
    pub zeroconf_port: Option<u16>,
}

impl CommonArgs {
    /// Arguments re-passed to ubus worker processes
    pub fn worker_args(&self, extra_module_paths: &[PathBuf]) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec!["--backend".into(), self.backend.as_str().into()];
        for path in extra_module_paths {
            args.push("--extra-module-path".into());
            args.push(path.into());
        }
        if self.debug {
            args.push("--debug".into());
        }
        if let Some(log_file) = &self.log_file {
            args.push("--log-file".into());
            args.push(log_file.into());
        }
        if self.json_logs {
            args.push("--json-logs".into());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix_socket() {
        let cli = Cli::try_parse_from([
            "foris-controller",
            "--backend",
            "mock",
            "-m",
            "lan",
            "unix-socket",
            "--path",
            "/tmp/c.soc",
        ])
        .unwrap();
        assert_eq!(cli.common.backend, Backend::Mock);
        assert_eq!(cli.common.modules, vec!["lan".to_string()]);
        match cli.transport {
            Transport::UnixSocket {
                path,
                notifications_path,
            } => {
                assert_eq!(path, PathBuf::from("/tmp/c.soc"));
                assert_eq!(notifications_path, PathBuf::from(DEFAULT_NOTIFICATIONS_PATH));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_backend_required() {
        assert!(Cli::try_parse_from(["foris-controller", "unix-socket"]).is_err());
        assert!(Cli::try_parse_from(["foris-controller", "--backend", "other", "unix-socket"]).is_err());
    }

    #[test]
    fn test_parse_mqtt() {
        let cli = Cli::try_parse_from([
            "foris-controller",
            "--backend",
            "openwrt",
            "mqtt",
            "--controller-id",
            "0000000A00000B00",
            "--announcer-period",
            "0.5",
            "--zeroconf-enabled",
            "--zeroconf-devices",
            "br-lan",
            "br-guest",
        ])
        .unwrap();
        match cli.transport {
            Transport::Mqtt(args) => {
                assert_eq!(args.port, DEFAULT_MQTT_PORT);
                assert_eq!(args.controller_id.unwrap().as_str(), "0000000A00000B00");
                assert_eq!(args.announcer_period, Some(0.5));
                assert!(args.zeroconf_enabled);
                assert_eq!(args.zeroconf_devices, vec!["br-lan", "br-guest"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_controller_id() {
        let result = Cli::try_parse_from([
            "foris-controller",
            "--backend",
            "mock",
            "mqtt",
            "--controller-id",
            "abc",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_worker_args_accept_module_flags() {
        let cli = Cli::try_parse_from(["foris-controller", "--backend", "mock", "-d", "ubus"]).unwrap();
        let mut args = vec![std::ffi::OsString::from("foris-controller")];
        args.extend(cli.common.worker_args(&[PathBuf::from("/opt/mods")]));
        args.extend(["ubus-worker", "--path", "/tmp/ubus.sock", "--module", "lan"].map(std::ffi::OsString::from));

        let worker = Cli::try_parse_from(args).unwrap();
        assert!(worker.common.debug);
        assert_eq!(worker.common.modules, vec!["lan".to_string()]);
        assert_eq!(worker.common.extra_module_paths, vec![PathBuf::from("/opt/mods")]);
        assert!(matches!(worker.transport, Transport::UbusWorker { .. }));
    }
}
