//! Modules implemented by external executables
//!
//! An external module is a directory containing:
//!
//! - `module.toml` with `name`, `version` and `actions`
//! - `schema.json`, the module's message schema
//! - `handler`, an executable run as `handler <action>`
//!
//! The request `data` is written to the handler's stdin as JSON. Exit status
//! 0 with JSON (or nothing) on stdout is the result; anything else is a
//! handler error. The backend name is exported as `FORIS_BACKEND`.

use crate::module::{Module, ModuleContext, ModuleProvider};
use crate::{HandlerError, HandlerResult, Result, RouterError};
use async_trait::async_trait;
use foris_core::Backend;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "module.toml";
pub const SCHEMA_FILE: &str = "schema.json";
pub const HANDLER_FILE: &str = "handler";

#[derive(Debug, Clone, Deserialize)]
struct Manifest {
    name: String,
    version: String,
    #[serde(default)]
    actions: Vec<String>,
}

/// Provider backed by a module directory
#[derive(Debug, Clone)]
pub struct ExternalProvider {
    dir: PathBuf,
    manifest: Manifest,
    schema: Value,
}

impl ExternalProvider {
    /// Load a module directory; `Ok(None)` when it has no manifest
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&manifest_path)?;
        let manifest: Manifest =
            toml::from_str(&content).map_err(|e| RouterError::InvalidManifest {
                path: manifest_path.display().to_string(),
                message: e.to_string(),
            })?;

        if !is_identifier(&manifest.name) {
            return Err(RouterError::InvalidManifest {
                path: manifest_path.display().to_string(),
                message: format!("invalid module name '{}'", manifest.name),
            });
        }

        let schema_path = dir.join(SCHEMA_FILE);
        if !schema_path.is_file() {
            return Err(RouterError::MissingSchema(manifest.name));
        }
        let schema: Value = serde_json::from_str(&std::fs::read_to_string(&schema_path)?)
            .map_err(|e| RouterError::InvalidManifest {
                path: schema_path.display().to_string(),
                message: e.to_string(),
            })?;

        Ok(Some(Self {
            dir: dir.to_path_buf(),
            manifest,
            schema,
        }))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ModuleProvider for ExternalProvider {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn version(&self) -> &str {
        &self.manifest.version
    }

    fn actions(&self) -> Vec<String> {
        self.manifest.actions.clone()
    }

    fn schema(&self) -> Result<Value> {
        Ok(self.schema.clone())
    }

    fn instantiate(&self, ctx: &ModuleContext) -> Result<Arc<dyn Module>> {
        let handler = self.dir.join(HANDLER_FILE);
        if !handler.is_file() {
            return Err(RouterError::Instantiate {
                name: self.manifest.name.clone(),
                message: format!("{} not found", handler.display()),
            });
        }

        Ok(Arc::new(ExternalModule {
            name: self.manifest.name.clone(),
            actions: self.manifest.actions.clone(),
            handler,
            backend: ctx.backend,
        }))
    }
}

/// Scan a search path for module directories, sorted by directory name
pub fn scan(path: &Path) -> Result<Vec<ExternalProvider>> {
    if !path.is_dir() {
        warn!("Extra module path {} is not a directory", path.display());
        return Ok(Vec::new());
    }

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut providers = Vec::new();
    for dir in dirs {
        match ExternalProvider::load(&dir)? {
            Some(provider) => providers.push(provider),
            None => debug!("Skipping {} (no {})", dir.display(), MANIFEST_FILE),
        }
    }
    Ok(providers)
}

struct ExternalModule {
    name: String,
    actions: Vec<String>,
    handler: PathBuf,
    backend: Backend,
}

#[async_trait]
impl Module for ExternalModule {
    async fn handle(&self, action: &str, data: Option<Value>) -> HandlerResult<Option<Value>> {
        if !self.actions.iter().any(|a| a == action) {
            return Err(HandlerError::UnknownAction(action.to_string()));
        }

        debug!("Running {} {} for '{}'", self.handler.display(), action, self.name);

        let mut child = Command::new(&self.handler)
            .arg(action)
            .env("FORIS_BACKEND", self.backend.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = serde_json::to_vec(&data.unwrap_or(Value::Object(Default::default())))?;
            stdin.write_all(&input).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(HandlerError::Command {
                program: self.handler.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(stdout)?))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
