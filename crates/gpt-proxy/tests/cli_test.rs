//! Binary tests.
//!
//! Runs the compiled `gpt-proxy` both as a serving process and as the
//! controlling invocation that signals it through the PID file.

use std::path::Path;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const ENV_VARS: [&str; 9] = [
    "GPT_PROXY_PORT",
    "GPT_PROXY_APIKEY",
    "GPT_PROXY_TARGET",
    "GPT_PROXY_SKIP",
    "GPT_PROXY_CERT",
    "GPT_PROXY_KEY",
    "GPT_PROXY_PID_FILE",
    "GPT_PROXY_SHUTDOWN_TIMEOUT",
    "GPT_PROXY_CONFIG",
];

// ── Helpers ───────────────────────────────────────────────────────────────────

fn gpt_proxy() -> Command {
    let mut cmd = Command::cargo_bin("gpt-proxy").unwrap();
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn signal(directive: &str, pid_file: &Path) -> assert_cmd::assert::Assert {
    gpt_proxy()
        .args(["-s", directive, "--pid-file"])
        .arg(pid_file)
        .assert()
}

/// Bind to port 0, record the assigned port, then release it.
fn free_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

async fn wait_for_port(port: u16, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
            Ok(_) => return,
            Err(_) => {
                if tokio::time::Instant::now() >= deadline {
                    panic!("Port {} not ready within {:?}", port, timeout);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn wait_for_file(path: &Path, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !path.exists() {
        if tokio::time::Instant::now() >= deadline {
            panic!("{} not written within {:?}", path.display(), timeout);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn spawn_server(port: u16, pid_file: &Path, config: Option<&Path>) -> tokio::process::Child {
    let dead_upstream = free_port();
    let mut cmd = tokio::process::Command::new(env!("CARGO_BIN_EXE_gpt-proxy"));
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "warn")
        .arg("--port")
        .arg(port.to_string())
        .args(["--apikey", "sk-test", "--target"])
        .arg(format!(
            "http://127.0.0.1:{}/v1/chat/completions",
            dead_upstream
        ))
        .arg("--pid-file")
        .arg(pid_file)
        .args(["--shutdown-timeout", "1"]);
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    cmd.kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn gpt-proxy binary")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_missing_api_key_is_fatal() {
    gpt_proxy()
        .args(["--target", "http://127.0.0.1:1/v1/chat/completions"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("API key is not set"));
}

#[test]
fn test_signal_without_pid_file_fails() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.pid");

    signal("stop", &missing)
        .failure()
        .stderr(predicate::str::contains("Failed to stop"))
        .stderr(predicate::str::contains("failed to read PID file"));
}

#[test]
fn test_unknown_directive_is_rejected() {
    gpt_proxy().args(["-s", "restart"]).assert().failure();
}

#[tokio::test]
async fn test_reload_then_stop_running_process() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("gpt-proxy.pid");
    let port = free_port();

    let mut server = spawn_server(port, &pid_file, None);
    wait_for_file(&pid_file, Duration::from_secs(15)).await;
    wait_for_port(port, Duration::from_secs(15)).await;

    let pid = server.id().unwrap();
    let recorded = std::fs::read_to_string(&pid_file).unwrap();
    assert_eq!(recorded.trim(), pid.to_string());

    signal("reload", &pid_file)
        .success()
        .stdout(predicate::str::contains(format!(
            "Successfully sent signal SIGUSR1 to process {}",
            pid
        )));
    // The listener comes back on the same port.
    tokio::time::sleep(Duration::from_millis(200)).await;
    wait_for_port(port, Duration::from_secs(10)).await;
    assert!(server.try_wait().unwrap().is_none(), "reload must not exit");

    signal("stop", &pid_file)
        .success()
        .stdout(predicate::str::contains("SIGTERM"));

    let status = tokio::time::timeout(Duration::from_secs(10), server.wait())
        .await
        .expect("server did not exit after stop")
        .unwrap();
    assert!(status.success(), "graceful stop should exit 0, got {status}");

    signal("stop", &pid_file)
        .failure()
        .stderr(predicate::str::contains("process not found"));
}

#[tokio::test]
async fn test_reload_with_broken_config_file_keeps_serving() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("gpt-proxy.pid");
    let config = dir.path().join("gpt-proxy.yml");
    std::fs::write(&config, "skip: q\n").unwrap();
    let port = free_port();

    let mut server = spawn_server(port, &pid_file, Some(&config));
    wait_for_file(&pid_file, Duration::from_secs(15)).await;
    wait_for_port(port, Duration::from_secs(15)).await;

    std::fs::write(&config, "skip: [unterminated\n").unwrap();
    signal("reload", &pid_file).success();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(
        server.try_wait().unwrap().is_none(),
        "a bad config on reload must not stop the process"
    );
    wait_for_port(port, Duration::from_secs(2)).await;

    signal("stop", &pid_file).success();
    let status = tokio::time::timeout(Duration::from_secs(10), server.wait())
        .await
        .expect("server did not exit after stop")
        .unwrap();
    assert!(status.success(), "graceful stop should exit 0, got {status}");
}
