//! Listener lifecycle.
//!
//! ```text
//! Stopped -> Starting -> Running -> Reloading -> Running
//!                                 \-> Stopping -> Stopped
//! ```
//!
//! [`Supervisor`] owns the one live listener. [`run`] owns the supervisor and
//! is the only caller of its mutators: it waits on OS signals and turns
//! SIGHUP/SIGUSR1 into a reload and SIGINT/SIGTERM into a stop.
//!
//! Must run inside the actix system runtime (`#[actix_web::main]`), since the
//! server future is spawned with [`actix_web::rt::spawn`].

use crate::config::{ConfigLoader, ProxyConfig};
use crate::error::LifecycleError;
use crate::pidfile::write_pid_file;
use crate::server::{self, AppState};
use crate::tls;
use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long a reload keeps retrying to bind while the previous listener's
/// accept loop releases the port.
const REBIND_WINDOW: Duration = Duration::from_secs(2);
const REBIND_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Reloading,
    Stopping,
}

/// Everything a listener needs that can fail before a socket is touched.
struct Prepared {
    state: web::Data<AppState>,
    tls: Option<rustls::ServerConfig>,
}

impl Prepared {
    fn new(config: &ProxyConfig) -> Result<Self, LifecycleError> {
        let state = web::Data::new(AppState::from_config(config)?);
        let tls = match &config.tls {
            Some(files) => Some(tls::load_server_config(files)?),
            None => None,
        };
        Ok(Self { state, tls })
    }
}

struct Listener {
    handle: ServerHandle,
    task: JoinHandle<io::Result<()>>,
    addrs: Vec<SocketAddr>,
}

/// Owns the HTTP listener. `start`, `reload` and `stop` are the only mutators.
pub struct Supervisor {
    state: LifecycleState,
    listener: Option<Listener>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Stopped,
            listener: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Addresses the current listener is bound to (empty when stopped).
    pub fn local_addrs(&self) -> &[SocketAddr] {
        self.listener
            .as_ref()
            .map(|l| l.addrs.as_slice())
            .unwrap_or_default()
    }

    /// Port actually bound, which differs from the configured one when that
    /// was `0`.
    pub fn port(&self) -> Option<u16> {
        self.local_addrs().first().map(|a| a.port())
    }

    /// Bind and begin serving, then record our PID.
    pub async fn start(&mut self, config: ProxyConfig) -> Result<(), LifecycleError> {
        if self.listener.is_some() {
            return Err(LifecycleError::AlreadyRunning);
        }

        self.state = LifecycleState::Starting;
        let prepared = match Prepared::new(&config) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.state = LifecycleState::Stopped;
                return Err(e);
            }
        };
        self.launch(&config, &prepared)
    }

    /// Drain the current listener, then serve `config` on the same port.
    ///
    /// Starts from scratch if nothing is running. Application state and TLS
    /// material are built before draining, so if they fail the current
    /// listener keeps serving and the error is returned.
    pub async fn reload(&mut self, mut config: ProxyConfig) -> Result<(), LifecycleError> {
        let Some(port) = self.port() else {
            return self.start(config).await;
        };

        if config.port != port && config.port != 0 {
            warn!(
                configured = config.port,
                port, "port changes are not applied on reload"
            );
        }
        config.port = port;

        let prepared = Prepared::new(&config)?;

        self.state = LifecycleState::Reloading;
        self.drain().await;
        self.relaunch(&config, &prepared).await
    }

    /// Drain and close the listener. In-flight requests get up to the
    /// configured shutdown timeout to finish.
    pub async fn stop(&mut self) {
        if self.listener.is_none() {
            self.state = LifecycleState::Stopped;
            return;
        }

        self.state = LifecycleState::Stopping;
        self.drain().await;
        self.state = LifecycleState::Stopped;
    }

    fn launch(&mut self, config: &ProxyConfig, prepared: &Prepared) -> Result<(), LifecycleError> {
        match spawn_listener(config, prepared) {
            Ok(listener) => {
                let pid = std::process::id();
                if let Err(e) = write_pid_file(&config.pid_file, pid) {
                    error!(
                        error = %e,
                        path = %config.pid_file.display(),
                        "failed to write PID file, stop/reload directives will not find this process"
                    );
                }
                info!(
                    pid,
                    addrs = ?listener.addrs,
                    tls = config.tls.is_some(),
                    target = %config.target,
                    "gpt-proxy listening"
                );

                self.listener = Some(listener);
                self.state = LifecycleState::Running;
                Ok(())
            }
            Err(e) => {
                self.state = LifecycleState::Stopped;
                Err(e)
            }
        }
    }

    async fn relaunch(
        &mut self,
        config: &ProxyConfig,
        prepared: &Prepared,
    ) -> Result<(), LifecycleError> {
        let deadline = Instant::now() + REBIND_WINDOW;
        loop {
            match self.launch(config, prepared) {
                Err(LifecycleError::Bind { ref source, .. })
                    if source.kind() == io::ErrorKind::AddrInUse && Instant::now() < deadline =>
                {
                    debug!(port = config.port, "port still held by previous listener, retrying");
                    tokio::time::sleep(REBIND_INTERVAL).await;
                }
                result => return result,
            }
        }
    }

    async fn drain(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };

        listener.handle.stop(true).await;
        match listener.task.await {
            Ok(Ok(())) => info!("server has been gracefully shut down"),
            Ok(Err(e)) => error!(error = %e, "error shutting down server"),
            Err(e) => error!(error = %e, "server task failed"),
        }
    }
}

fn spawn_listener(config: &ProxyConfig, prepared: &Prepared) -> Result<Listener, LifecycleError> {
    let state = prepared.state.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(server::configure)
    })
    .disable_signals()
    .shutdown_timeout(config.shutdown_timeout.as_secs());

    let addr = config.bind_addr();
    let bind_err = |source| LifecycleError::Bind {
        addr: addr.clone(),
        source,
    };
    let server = match &prepared.tls {
        Some(tls_config) => server
            .bind_rustls_0_23(&addr, tls_config.clone())
            .map_err(bind_err)?,
        None => server.bind(&addr).map_err(bind_err)?,
    };

    let addrs = server.addrs();
    let server = server.run();
    let handle = server.handle();
    let task = actix_web::rt::spawn(server);

    Ok(Listener {
        handle,
        task,
        addrs,
    })
}

/// What an OS signal asks the serving process to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Reload,
    Shutdown,
}

#[cfg(unix)]
struct Signals {
    hangup: tokio::signal::unix::Signal,
    user1: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> Result<Self, LifecycleError> {
        use tokio::signal::unix::{signal, SignalKind};

        let install = |kind| signal(kind).map_err(LifecycleError::Signal);
        Ok(Self {
            hangup: install(SignalKind::hangup())?,
            user1: install(SignalKind::user_defined1())?,
            interrupt: install(SignalKind::interrupt())?,
            terminate: install(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.hangup.recv() => {
                info!("Received SIGHUP");
                SignalEvent::Reload
            }
            _ = self.user1.recv() => {
                info!("Received SIGUSR1");
                SignalEvent::Reload
            }
            _ = self.interrupt.recv() => {
                info!("Received SIGINT");
                SignalEvent::Shutdown
            }
            _ = self.terminate.recv() => {
                info!("Received SIGTERM");
                SignalEvent::Shutdown
            }
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> Result<Self, LifecycleError> {
        Ok(Self)
    }

    async fn recv(&mut self) -> SignalEvent {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C");
        SignalEvent::Shutdown
    }
}

/// Serve until a termination signal arrives.
///
/// Configuration is loaded once up front (errors are fatal) and again on
/// every reload signal. A reload whose configuration fails to load or
/// prepare is skipped and the current listener keeps serving. Only losing
/// the listener itself ends the loop with an error.
pub async fn run(loader: ConfigLoader) -> Result<(), LifecycleError> {
    let config = loader.load()?;
    let mut signals = Signals::install()?;

    let mut supervisor = Supervisor::new();
    supervisor.start(config).await?;

    loop {
        match signals.recv().await {
            SignalEvent::Reload => {
                info!("gracefully restarting listener");
                let result = match loader.load() {
                    Ok(config) => supervisor.reload(config).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = result {
                    if supervisor.state() != LifecycleState::Running {
                        return Err(e);
                    }
                    error!(error = %e, "reload aborted, keeping current listener");
                }
            }
            SignalEvent::Shutdown => {
                info!("gracefully shutting down server");
                supervisor.stop().await;
                return Ok(());
            }
        }
    }
}
