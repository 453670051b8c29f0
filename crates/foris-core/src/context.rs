//! Application info shared by every component
//!
//! A [`Context`] is built once at startup from the command line and handed to
//! every component constructor behind an `Arc`. It is never mutated.

use crate::{Error, Result, Validator, DEFAULT_ANNOUNCER_PERIOD};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of this daemon instance (16 uppercase hex digits)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControllerId(String);

impl ControllerId {
    /// Generate a random controller id
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(hex[..16].to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ControllerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let valid = s.len() == 16
            && s
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidControllerId(s.to_string()))
        }
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which implementation handlers use for system access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// In-memory fakes
    Mock,
    /// Real OpenWrt utilities
    Openwrt,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Mock => "mock",
            Backend::Openwrt => "openwrt",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mock" => Ok(Backend::Mock),
            "openwrt" => Ok(Backend::Openwrt),
            other => Err(Error::Config(format!("unknown backend: {}", other))),
        }
    }
}

/// MQTT broker credentials
#[derive(Clone, PartialEq, Eq)]
pub struct MqttCredentials {
    pub username: String,
    pub password: String,
}

impl MqttCredentials {
    /// Parse `username:password` from the first non-empty line
    pub fn parse(content: &str) -> Result<Self> {
        let line = content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| Error::Config("password file is empty".into()))?;

        let (username, password) = line
            .split_once(':')
            .ok_or_else(|| Error::Config("expected 'username:password'".into()))?;

        if username.is_empty() {
            return Err(Error::Config("username is empty".into()));
        }

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }
}

impl fmt::Debug for MqttCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Zero-configuration announcement parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeroconfConfig {
    /// Interfaces to announce on (empty = all)
    pub devices: Vec<String>,
    /// Port announced for the MQTT endpoint
    pub port: u16,
}

/// Truthy values of boolean environment flags
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Read a boolean flag from the environment
pub fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| is_truthy(&v)).unwrap_or(false)
}

/// Process-wide application info
#[derive(Debug, Clone)]
pub struct Context {
    pub controller_id: ControllerId,
    pub backend: Backend,
    pub validator: Arc<Validator>,
    pub mqtt_credentials: Option<MqttCredentials>,
    /// Enabled modules (`None` = all)
    pub module_filter: Option<BTreeSet<String>>,
    /// Advertizement period (zero disables periodic adverts)
    pub announcer_period: Duration,
    pub zeroconf: Option<ZeroconfConfig>,
    /// Refresh `modules`/`hostname` on every advertizement
    pub disable_adv_cache: bool,
}

impl Context {
    pub fn new(controller_id: ControllerId, backend: Backend, validator: Arc<Validator>) -> Self {
        Self {
            controller_id,
            backend,
            validator,
            mqtt_credentials: None,
            module_filter: None,
            announcer_period: Duration::from_secs_f64(DEFAULT_ANNOUNCER_PERIOD),
            zeroconf: None,
            disable_adv_cache: env_flag(crate::ENV_DISABLE_ADV_CACHE),
        }
    }

    pub fn with_mqtt_credentials(mut self, credentials: Option<MqttCredentials>) -> Self {
        self.mqtt_credentials = credentials;
        self
    }

    pub fn with_module_filter(mut self, filter: Option<BTreeSet<String>>) -> Self {
        self.module_filter = filter;
        self
    }

    /// Set the announcer period in seconds
    pub fn with_announcer_period(mut self, seconds: f64) -> Result<Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(Error::Config(format!(
                "announcer period must be a non-negative number, got {}",
                seconds
            )));
        }
        self.announcer_period = Duration::from_secs_f64(seconds);
        Ok(self)
    }

    pub fn with_zeroconf(mut self, zeroconf: Option<ZeroconfConfig>) -> Self {
        self.zeroconf = zeroconf;
        self
    }

    pub fn with_adv_cache_disabled(mut self, disabled: bool) -> Self {
        self.disable_adv_cache = disabled;
        self
    }

    /// Whether `module` passes the enabled-module filter
    pub fn is_module_enabled(&self, module: &str) -> bool {
        self.module_filter
            .as_ref()
            .map_or(true, |filter| filter.contains(module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_id() {
        assert!("0011223344AABBCC".parse::<ControllerId>().is_ok());
        assert!("0011223344aabbcc".parse::<ControllerId>().is_err());
        assert!("0011223344AABBC".parse::<ControllerId>().is_err());
        assert!("0011223344AABBCG".parse::<ControllerId>().is_err());

        let generated = ControllerId::generate();
        assert!(generated.as_str().parse::<ControllerId>().is_ok());
    }

    #[test]
    fn test_credentials() {
        let creds = MqttCredentials::parse("\n  user:se:cret \n").unwrap();
        assert_eq!(creds.username, "user");
        assert_eq!(creds.password, "se:cret");
        assert!(!format!("{:?}", creds).contains("se:cret"));

        assert!(MqttCredentials::parse("").is_err());
        assert!(MqttCredentials::parse("nocolon").is_err());
        assert!(MqttCredentials::parse(":pass").is_err());
    }

    #[test]
    fn test_truthy() {
        for v in ["1", "true", "TRUE", " yes ", "on"] {
            assert!(is_truthy(v), "{}", v);
        }
        for v in ["0", "false", "", "nope"] {
            assert!(!is_truthy(v), "{}", v);
        }
    }

    #[test]
    fn test_context_filter_and_period() {
        let validator = Arc::new(Validator::new(Vec::<(String, serde_json::Value)>::new()).unwrap());
        let ctx = Context::new(ControllerId::generate(), Backend::Mock, validator)
            .with_module_filter(Some(["lan".to_string()].into_iter().collect()));
        assert!(ctx.is_module_enabled("lan"));
        assert!(!ctx.is_module_enabled("wifi"));

        let ctx = ctx.with_announcer_period(0.5).unwrap();
        assert_eq!(ctx.announcer_period, Duration::from_millis(500));
        assert!(ctx.clone().with_announcer_period(-1.0).is_err());
    }
}
