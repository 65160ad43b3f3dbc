//! `gpt-proxy` binary entrypoint.
//!
//! Either serves (default) or, with `-s stop|reload`, signals the instance
//! recorded in the PID file and exits.

use clap::Parser;
use gpt_proxy::cli::Cli;
use gpt_proxy::control;
use std::process;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Respect `RUST_LOG` if set; otherwise default to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(directive) = cli.signal {
        let pid_file = cli.pid_file();
        match control::send(directive, &pid_file) {
            Ok(pid) => {
                println!(
                    "Successfully sent signal {} to process {}",
                    directive.signal_name(),
                    pid
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("Failed to {}: {}", directive, e);
                process::exit(1);
            }
        }
    }

    gpt_proxy::run(cli.config_loader()).await.map_err(|e| {
        tracing::error!(error = %e, "gpt-proxy exited with error");
        e.into()
    })
}
