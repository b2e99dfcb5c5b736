//! Layered invocation settings.
//!
//! Every knob resolves flag first, then `DOCPORT_*` environment variable,
//! then config file, then default. The file is TOML, taken from `--config`
//! when given, otherwise discovered at `./docport.toml` or
//! `~/.docport/config.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use docport_client::{ClientConfig, DocRegistryClient, FileStore, TransportMode};
use serde::Deserialize;

use crate::progress::SpinnerProgress;

/// Default request timeout for interactive use. Looser than the library
/// default so slow script-hosted endpoints get a fair chance.
pub const CLI_DEFAULT_TIMEOUT_MS: u64 = 35_000;

const CONFIG_FILE_NAME: &str = "docport.toml";
const STATE_DIR_NAME: &str = ".docport";
const STATE_FILE_NAME: &str = "state.json";

const ENV_ENDPOINT: &str = "DOCPORT_ENDPOINT";
const ENV_DEVICE_KEY: &str = "DOCPORT_DEVICE_KEY";
const ENV_CLIENT_IP_KEY: &str = "DOCPORT_CLIENT_IP_KEY";
const ENV_TIMEOUT_MS: &str = "DOCPORT_TIMEOUT_MS";
const ENV_TRANSPORT: &str = "DOCPORT_TRANSPORT";
const ENV_STATE_DIR: &str = "DOCPORT_STATE_DIR";

/// Global flags shared by every subcommand. `None` means "not given".
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Overrides {
    /// Endpoint URL of the script-hosted registry.
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Path to a TOML config file.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Device key to present instead of the stored one.
    #[arg(long, global = true, value_name = "KEY")]
    pub device_key: Option<String>,

    /// Request timeout in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Transport selection: auto, post, or jsonp.
    #[arg(long, global = true, value_name = "MODE")]
    pub transport: Option<String>,

    /// Directory holding persisted preferences and the session cache.
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Disable the progress spinner.
    #[arg(long, global = true)]
    pub plain: bool,
}

/// Shape of the optional TOML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    endpoint: Option<String>,
    device_key: Option<String>,
    client_ip_key: Option<String>,
    timeout_ms: Option<u64>,
    transport: Option<String>,
    state_dir: Option<PathBuf>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: String,
    pub device_key: Option<String>,
    pub client_ip_key: Option<String>,
    pub timeout_ms: u64,
    pub transport: TransportMode,
    pub state_dir: Option<PathBuf>,
    pub plain: bool,
}

impl Settings {
    /// Resolve settings from flags, the environment, and the config file.
    pub fn resolve(overrides: &Overrides) -> anyhow::Result<Self> {
        let file = load_file_settings(overrides.config.as_deref())?;
        Self::merge(overrides, &file, |key| std::env::var(key).ok())
    }

    fn merge(
        overrides: &Overrides,
        file: &FileSettings,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let endpoint = first_non_empty([
            overrides.endpoint.clone(),
            env(ENV_ENDPOINT),
            file.endpoint.clone(),
        ]);
        let Some(endpoint) = endpoint else {
            bail!(
                "no endpoint configured; pass --endpoint, set {ENV_ENDPOINT}, \
                 or add `endpoint` to {CONFIG_FILE_NAME}"
            );
        };

        let device_key = first_non_empty([
            overrides.device_key.clone(),
            env(ENV_DEVICE_KEY),
            file.device_key.clone(),
        ]);
        let client_ip_key = first_non_empty([env(ENV_CLIENT_IP_KEY), file.client_ip_key.clone()]);

        let timeout_ms = match (overrides.timeout_ms, env(ENV_TIMEOUT_MS)) {
            (Some(ms), _) => ms,
            (None, Some(raw)) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{ENV_TIMEOUT_MS} is not a number: {raw:?}"))?,
            (None, None) => file.timeout_ms.unwrap_or(CLI_DEFAULT_TIMEOUT_MS),
        };

        let transport = match first_non_empty([
            overrides.transport.clone(),
            env(ENV_TRANSPORT),
            file.transport.clone(),
        ]) {
            Some(raw) => TransportMode::parse(&raw)
                .with_context(|| format!("unknown transport {raw:?}; expected auto, post, or jsonp"))?,
            None => TransportMode::Auto,
        };

        let state_dir = overrides
            .state_dir
            .clone()
            .or_else(|| env(ENV_STATE_DIR).map(PathBuf::from))
            .or_else(|| file.state_dir.clone())
            .or_else(default_state_dir);

        Ok(Self {
            endpoint,
            device_key,
            client_ip_key,
            timeout_ms,
            transport,
            state_dir,
            plain: overrides.plain,
        })
    }

    /// Build a client wired to this invocation's state store and spinner.
    pub fn client(&self) -> anyhow::Result<DocRegistryClient> {
        let mut config = ClientConfig::new(&self.endpoint)
            .with_context(|| format!("invalid endpoint {:?}", self.endpoint))?
            .with_timeout_ms(self.timeout_ms)
            .with_transport(self.transport);
        if let Some(device_key) = &self.device_key {
            config = config.with_device_key(device_key);
        }
        if let Some(client_ip_key) = &self.client_ip_key {
            config = config.with_client_ip_key(client_ip_key);
        }

        let mut builder = DocRegistryClient::builder(config);
        if let Some(dir) = &self.state_dir {
            match FileStore::open(dir.join(STATE_FILE_NAME)) {
                Ok(store) => builder = builder.durable_store(Arc::new(store)),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        path = %dir.display(),
                        "state store unavailable; device key and transport preference will not persist"
                    );
                }
            }
        }
        if !self.plain {
            builder = builder.progress(Arc::new(SpinnerProgress::new()));
        }
        Ok(builder.build())
    }
}

fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn load_file_settings(explicit: Option<&Path>) -> anyhow::Result<FileSettings> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => discover_config_file(),
    };
    let Some(path) = path else {
        return Ok(FileSettings::default());
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn discover_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    let home = dirs::home_dir()?.join(STATE_DIR_NAME).join("config.toml");
    home.is_file().then_some(home)
}

fn default_state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STATE_DIR_NAME))
}
