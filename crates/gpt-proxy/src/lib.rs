//! gpt-proxy - reverse proxy for chat-completion APIs.
//!
//! Sits between chat clients and an OpenAI-compatible `/v1/chat/completions`
//! endpoint:
//! - strips a marker substring such as `(q)` from the requested model,
//! - injects the upstream API key as a bearer token,
//! - streams the upstream response back untouched.
//!
//! A running instance records its PID on disk. Invoking the binary again
//! with `-s reload` or `-s stop` signals that instance, which then drains
//! its listener and either restarts it with fresh configuration or exits.

pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod pidfile;
pub mod rewrite;
pub mod server;
pub mod tls;
pub mod types;

pub use config::{ConfigLoader, ProxyConfig};
pub use lifecycle::{run, Supervisor};
