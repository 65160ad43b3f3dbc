//! Configuration from command-line flags, environment variables and an
//! optional YAML file.
//!
//! Precedence is flags/env > file > built-in defaults. The file is re-read on
//! every [`ConfigLoader::load`] call, which is what makes `reload` pick up
//! edits without restarting the process:
//!
//! ```yaml
//! apikey: "sk-..."
//! target: "https://api.openai.com/v1/chat/completions"
//! skip: "q"
//! port: 8088
//! cert: "/etc/gpt-proxy/cert.pem"
//! key: "/etc/gpt-proxy/key.pem"
//! pid_file: "/var/run/gpt-proxy.pid"
//! shutdown_timeout_secs: 30
//! ```

use crate::error::ConfigError;
use reqwest::Url;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8088;
pub const DEFAULT_SKIP_WORD: &str = "q";
pub const DEFAULT_PID_FILE: &str = "/var/run/gpt-proxy.pid";
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Fully resolved configuration for one listener generation.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub api_key: String,
    pub target: Url,
    pub skip_word: String,
    pub tls: Option<TlsFiles>,
    pub pid_file: PathBuf,
    /// Grace period for draining in-flight requests on reload or stop.
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl ProxyConfig {
    /// The literal substring removed from model identifiers, e.g. `(q)`.
    pub fn marker(&self) -> String {
        format!("({})", self.skip_word)
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Values supplied on the command line (or through their env fallbacks).
///
/// Everything is optional so that the config file can fill the gaps.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub api_key: Option<String>,
    pub target: Option<String>,
    pub skip_word: Option<String>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    port: Option<u16>,
    apikey: Option<String>,
    target: Option<String>,
    skip: Option<String>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
    pid_file: Option<PathBuf>,
    shutdown_timeout_secs: Option<u64>,
}

impl FileConfig {
    fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        // An empty file deserializes to `null`, which means "no settings".
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(&content).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Produces a fresh [`ProxyConfig`] on demand.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    overrides: ConfigOverrides,
    file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(overrides: ConfigOverrides, file: Option<PathBuf>) -> Self {
        Self { overrides, file }
    }

    pub fn load(&self) -> Result<ProxyConfig, ConfigError> {
        let file = match &self.file {
            Some(path) => FileConfig::from_yaml_file(path)?,
            None => FileConfig::default(),
        };
        resolve(self.overrides.clone(), file)
    }

    /// PID file path from flags or the config file, without requiring the
    /// rest of the configuration to be valid.
    pub fn pid_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.overrides.pid_file {
            return Some(path.clone());
        }
        let path = self.file.as_ref()?;
        FileConfig::from_yaml_file(path).ok()?.pid_file
    }
}

fn resolve(cli: ConfigOverrides, file: FileConfig) -> Result<ProxyConfig, ConfigError> {
    let api_key = cli
        .api_key
        .or(file.apikey)
        .filter(|k| !k.is_empty())
        .ok_or(ConfigError::MissingApiKey)?;

    let target = cli
        .target
        .or(file.target)
        .filter(|t| !t.is_empty())
        .ok_or(ConfigError::MissingTarget)?;
    let target = parse_target(&target)?;

    let tls = match (cli.cert.or(file.cert), cli.key.or(file.key)) {
        (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
        (Some(_), None) => return Err(ConfigError::IncompleteTls("certificate")),
        (None, Some(_)) => return Err(ConfigError::IncompleteTls("key")),
        (None, None) => None,
    };

    Ok(ProxyConfig {
        port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
        api_key,
        target,
        skip_word: cli
            .skip_word
            .or(file.skip)
            .unwrap_or_else(|| DEFAULT_SKIP_WORD.to_string()),
        tls,
        pid_file: cli
            .pid_file
            .or(file.pid_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_FILE)),
        shutdown_timeout: Duration::from_secs(
            cli.shutdown_timeout_secs
                .or(file.shutdown_timeout_secs)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        ),
    })
}

fn parse_target(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidTarget {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(url)
}
