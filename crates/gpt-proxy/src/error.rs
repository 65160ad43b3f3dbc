use actix_web::http::StatusCode;
use actix_web::ResponseError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API key is not set, provide it via --apikey")]
    MissingApiKey,

    #[error("API key contains characters that are not allowed in an HTTP header")]
    InvalidApiKey,

    #[error("target API is not set, provide it via --target")]
    MissingTarget,

    #[error("invalid target URL {url:?}: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("TLS needs both a certificate and a key (got only the {0})")]
    IncompleteTls(&'static str),

    #[error("failed to read config file {path:?}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("failed to load TLS material: {0}")]
    Tls(String),
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("failed to parse chat request: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("failed to serialize chat request: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to read PID file {path:?}: {source}")]
    ReadPidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PID file {path:?} does not hold a valid process id: {content:?}")]
    InvalidPid { path: PathBuf, content: String },

    #[error("process not found: {0}")]
    ProcessNotFound(i32),

    #[error("failed to send {signal} to process {pid}: {reason}")]
    SendFailed {
        signal: &'static str,
        pid: i32,
        reason: String,
    },

    #[error("signal delivery is not supported on this platform")]
    Unsupported,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("proxy is already running")]
    AlreadyRunning,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Errors the forwarding handler can produce (converted to HTTP responses).
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
