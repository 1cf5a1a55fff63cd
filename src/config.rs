//! ktctl configuration stored at `~/.ktctl/`.
//!
//! - `~/.ktctl/config.json` - persisted defaults (namespace, image, kubeconfig)
//! - `~/.ktctl/pid` - PID of a running `connect` daemon
//! - `~/.ktctl/pk_<component>_<version>` - per-session private keys
//!
//! Each setting resolves, highest priority first:
//! 1. Explicit CLI flag
//! 2. Environment variable (`KTCTL_NAMESPACE`, `KTCTL_IMAGE`, `KUBECONFIG`)
//! 3. `~/.ktctl/config.json`
//! 4. Built-in default

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ktctl_cluster::readiness::WaitOptions;
use ktctl_common::{APP_HOME_DIR, PID_FILE_NAME};

use crate::{Error, Result};

const CONFIG_FILE_NAME: &str = "config.json";

/// Namespace used when nothing else is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Shadow image used when nothing else is configured
pub const DEFAULT_SHADOW_IMAGE: &str =
    "registry.cn-hangzhou.aliyuncs.com/rdc-incubator/kt-connect-shadow:stable";

/// Environment variable overriding the namespace
pub const NAMESPACE_ENV: &str = "KTCTL_NAMESPACE";

/// Environment variable overriding the shadow image
pub const IMAGE_ENV: &str = "KTCTL_IMAGE";

/// Standard kubeconfig environment variable
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Persisted defaults in `~/.ktctl/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct KtctlConfig {
    /// Default namespace
    pub namespace: Option<String>,
    /// Default shadow image
    pub image: Option<String>,
    /// Default kubeconfig path
    pub kubeconfig: Option<String>,
}

/// Returns `~/.ktctl/`, creating it if it doesn't exist.
pub fn app_home() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::command_failed("could not determine home directory"))?;
    let dir = home.join(APP_HOME_DIR);
    ensure_dir(&dir)?;
    Ok(dir)
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::command_failed(format!("failed to create {}: {}", dir.display(), e))
        })?;
    }
    Ok(())
}

/// Path of the daemon PID file under `app_home`.
pub fn pid_file_path(app_home: &Path) -> PathBuf {
    app_home.join(PID_FILE_NAME)
}

/// Load config from `<app_home>/config.json`, returning default if missing.
pub fn load_config(app_home: &Path) -> Result<KtctlConfig> {
    let path = app_home.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(KtctlConfig::default());
    }
    let data = std::fs::read_to_string(&path)
        .map_err(|e| Error::command_failed(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&data)
        .map_err(|e| Error::command_failed(format!("failed to parse {}: {}", path.display(), e)))
}

/// Save config to `<app_home>/config.json`.
pub fn save_config(app_home: &Path, config: &KtctlConfig) -> Result<()> {
    ensure_dir(app_home)?;
    let path = app_home.join(CONFIG_FILE_NAME);
    let data = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, data)
        .map_err(|e| Error::command_failed(format!("failed to write {}: {}", path.display(), e)))
}

/// Pick the first non-empty value in priority order.
fn first_set<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Flag values for the settings that go through the resolution chain
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--namespace`
    pub namespace: Option<String>,
    /// `--image`
    pub image: Option<String>,
    /// `--kubeconfig`
    pub kubeconfig: Option<String>,
}

/// Environment lookups, injectable for tests
pub trait Environment {
    /// Value of an environment variable, if set
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fully resolved settings for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Target namespace
    pub namespace: String,
    /// Shadow container image
    pub image: String,
    /// Kubeconfig path; `None` infers from the environment
    pub kubeconfig: Option<PathBuf>,
    /// `~/.ktctl`
    pub app_home: PathBuf,
    /// User labels applied last to every shadow
    pub labels: BTreeMap<String, String>,
    /// Debug mode for logs and the shadow container
    pub debug: bool,
    /// Readiness wait pacing and deadline
    pub wait: WaitOptions,
}

impl Settings {
    /// Resolve settings from flags, environment and `config.json`.
    pub fn resolve(
        app_home: PathBuf,
        overrides: &Overrides,
        env: &dyn Environment,
        labels: BTreeMap<String, String>,
        debug: bool,
        wait_timeout_secs: u64,
    ) -> Result<Self> {
        let file = load_config(&app_home)?;
        let env_namespace = env.var(NAMESPACE_ENV);
        let env_image = env.var(IMAGE_ENV);
        let env_kubeconfig = env.var(KUBECONFIG_ENV);

        let namespace = first_set([
            overrides.namespace.as_deref(),
            env_namespace.as_deref(),
            file.namespace.as_deref(),
        ])
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let image = first_set([
            overrides.image.as_deref(),
            env_image.as_deref(),
            file.image.as_deref(),
        ])
        .unwrap_or_else(|| DEFAULT_SHADOW_IMAGE.to_string());

        let kubeconfig = first_set([
            overrides.kubeconfig.as_deref(),
            env_kubeconfig.as_deref(),
            file.kubeconfig.as_deref(),
        ])
        .map(PathBuf::from);

        Ok(Self {
            namespace,
            image,
            kubeconfig,
            app_home,
            labels,
            debug,
            wait: WaitOptions::from_timeout_secs(wait_timeout_secs),
        })
    }

    /// Path of the daemon PID file
    pub fn pid_file(&self) -> PathBuf {
        pid_file_path(&self.app_home)
    }
}
