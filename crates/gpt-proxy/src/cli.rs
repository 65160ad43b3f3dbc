//! Command-line flags.

use crate::config::{ConfigLoader, ConfigOverrides};
use crate::control::Directive;
use clap::Parser;
use std::path::PathBuf;

/// Reverse proxy for chat-completion APIs.
///
/// Strips a marker such as `(q)` from the requested model, injects the
/// upstream API key and streams the response back.
#[derive(Parser, Debug)]
#[command(name = "gpt-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// HTTP server port [default: 8088]
    #[arg(long, env = "GPT_PROXY_PORT")]
    pub port: Option<u16>,

    /// API key for authorization against the target
    #[arg(long, env = "GPT_PROXY_APIKEY", hide_env_values = true)]
    pub apikey: Option<String>,

    /// Target server URL, e.g. https://api.openai.com/v1/chat/completions
    #[arg(long, env = "GPT_PROXY_TARGET")]
    pub target: Option<String>,

    /// Word to skip: `(word)` is removed from model names [default: q]
    #[arg(long, env = "GPT_PROXY_SKIP")]
    pub skip: Option<String>,

    /// TLS certificate chain (PEM); TLS is enabled when --key is also set
    #[arg(long, env = "GPT_PROXY_CERT")]
    pub cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, env = "GPT_PROXY_KEY")]
    pub key: Option<PathBuf>,

    /// PID file used by `-s stop|reload` [default: /var/run/gpt-proxy.pid]
    #[arg(long, env = "GPT_PROXY_PID_FILE")]
    pub pid_file: Option<PathBuf>,

    /// Seconds to wait for in-flight requests on reload/stop [default: 30]
    #[arg(long, env = "GPT_PROXY_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout: Option<u64>,

    /// YAML config file, re-read on every reload
    #[arg(long, env = "GPT_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Send a signal to the running process instead of serving
    #[arg(short = 's', long = "signal", value_enum)]
    pub signal: Option<Directive>,
}

impl Cli {
    pub fn config_loader(&self) -> ConfigLoader {
        let overrides = ConfigOverrides {
            port: self.port,
            api_key: self.apikey.clone(),
            target: self.target.clone(),
            skip_word: self.skip.clone(),
            cert: self.cert.clone(),
            key: self.key.clone(),
            pid_file: self.pid_file.clone(),
            shutdown_timeout_secs: self.shutdown_timeout,
        };
        ConfigLoader::new(overrides, self.config.clone())
    }

    /// PID file a controlling invocation should read.
    ///
    /// Honours `--pid-file`, then the config file, then the default. A config
    /// file that cannot be loaded is ignored here: signalling only needs the
    /// path.
    pub fn pid_file(&self) -> PathBuf {
        if let Some(path) = &self.pid_file {
            return path.clone();
        }
        self.config_loader()
            .pid_file()
            .unwrap_or_else(|| PathBuf::from(crate::config::DEFAULT_PID_FILE))
    }
}
