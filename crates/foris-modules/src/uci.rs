//! UCI configuration store
//!
//! Handlers read and write router configuration through a [`ConfigStore`],
//! which serialises access with a reader/writer lock: any number of readers
//! or a single writer at a time. The `mock` backend keeps values in memory,
//! the `openwrt` backend shells out to the `uci` utility.

use async_trait::async_trait;
use foris_core::Backend;
use foris_router::{HandlerError, HandlerResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::process::Command;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Key/value access to UCI options (`config.section.option`)
#[async_trait]
pub trait UciBackend: Send + Sync {
    async fn get(&self, key: &str) -> HandlerResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> HandlerResult<()>;

    async fn delete(&self, key: &str) -> HandlerResult<()>;

    /// Persist pending changes of `config`
    async fn commit(&self, config: &str) -> HandlerResult<()>;

    /// Reload the service owning `config`
    async fn reload(&self, service: &str) -> HandlerResult<()>;
}

/// In-memory store used with the `mock` backend
#[derive(Debug, Default)]
pub struct MockUci {
    values: Mutex<BTreeMap<String, String>>,
    reloads: Mutex<Vec<String>>,
}

impl MockUci {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with `values`
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        store
            .values
            .lock()
            .extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));
        store
    }

    /// Services reloaded so far
    pub fn reloads(&self) -> Vec<String> {
        self.reloads.lock().clone()
    }
}

#[async_trait]
impl UciBackend for MockUci {
    async fn get(&self, key: &str) -> HandlerResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> HandlerResult<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> HandlerResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn commit(&self, _config: &str) -> HandlerResult<()> {
        Ok(())
    }

    async fn reload(&self, service: &str) -> HandlerResult<()> {
        self.reloads.lock().push(service.to_string());
        Ok(())
    }
}

/// Store backed by the `uci` command line tool
#[derive(Debug, Clone)]
pub struct OpenwrtUci {
    program: String,
}

impl OpenwrtUci {
    pub fn new() -> Self {
        Self {
            program: "uci".to_string(),
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> HandlerResult<std::process::Output> {
        debug!("Running {} {}", program, args.join(" "));
        Ok(Command::new(program).args(args).output().await?)
    }

    async fn run_checked(&self, program: &str, args: &[&str]) -> HandlerResult<String> {
        let output = self.run(program, args).await?;
        if !output.status.success() {
            return Err(HandlerError::Command {
                program: format!("{} {}", program, args.join(" ")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

impl Default for OpenwrtUci {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UciBackend for OpenwrtUci {
    async fn get(&self, key: &str) -> HandlerResult<Option<String>> {
        // uci exits non-zero for a missing option
        let output = self.run(&self.program, &["-q", "get", key]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        ))
    }

    async fn set(&self, key: &str, value: &str) -> HandlerResult<()> {
        let assignment = format!("{}={}", key, value);
        self.run_checked(&self.program, &["set", &assignment]).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> HandlerResult<()> {
        // deleting a missing option is not an error
        self.run(&self.program, &["-q", "delete", key]).await?;
        Ok(())
    }

    async fn commit(&self, config: &str) -> HandlerResult<()> {
        self.run_checked(&self.program, &["commit", config]).await?;
        Ok(())
    }

    async fn reload(&self, service: &str) -> HandlerResult<()> {
        let script = format!("/etc/init.d/{}", service);
        self.run_checked(&script, &["reload"]).await?;
        Ok(())
    }
}

/// Lock-guarded access to a [`UciBackend`]
pub struct ConfigStore {
    backend: Box<dyn UciBackend>,
    lock: RwLock<()>,
}

impl ConfigStore {
    pub fn new(backend: Box<dyn UciBackend>) -> Self {
        Self {
            backend,
            lock: RwLock::new(()),
        }
    }

    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Mock => Self::new(Box::new(MockUci::new())),
            Backend::Openwrt => Self::new(Box::new(OpenwrtUci::new())),
        }
    }

    pub async fn read(&self) -> UciReader<'_> {
        UciReader {
            _guard: self.lock.read().await,
            backend: self.backend.as_ref(),
        }
    }

    pub async fn write(&self) -> UciWriter<'_> {
        UciWriter {
            _guard: self.lock.write().await,
            backend: self.backend.as_ref(),
        }
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore").finish_non_exhaustive()
    }
}

/// Shared (read) access
pub struct UciReader<'a> {
    _guard: RwLockReadGuard<'a, ()>,
    backend: &'a dyn UciBackend,
}

impl UciReader<'_> {
    pub async fn get(&self, key: &str) -> HandlerResult<Option<String>> {
        self.backend.get(key).await
    }

    pub async fn get_or(&self, key: &str, default: &str) -> HandlerResult<String> {
        Ok(self.backend.get(key).await?.unwrap_or_else(|| default.to_string()))
    }
}

/// Exclusive (write) access
pub struct UciWriter<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
    backend: &'a dyn UciBackend,
}

impl UciWriter<'_> {
    pub async fn get(&self, key: &str) -> HandlerResult<Option<String>> {
        self.backend.get(key).await
    }

    pub async fn set(&self, key: &str, value: impl AsRef<str>) -> HandlerResult<()> {
        self.backend.set(key, value.as_ref()).await
    }

    pub async fn delete(&self, key: &str) -> HandlerResult<()> {
        self.backend.delete(key).await
    }

    pub async fn commit(&self, configs: &[&str]) -> HandlerResult<()> {
        for config in configs {
            self.backend.commit(config).await?;
        }
        Ok(())
    }

    pub async fn reload(&self, service: &str) -> HandlerResult<()> {
        self.backend.reload(service).await
    }
}

/// Parse a UCI boolean (`1`, `yes`, `on`, `true`, `enabled`)
pub fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "yes" | "on" | "true" | "enabled")
}

pub fn store_bool(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
