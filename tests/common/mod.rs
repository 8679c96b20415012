use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use d_fleet::ApplicationController;
use d_fleet::ApplicationDriver;
use d_fleet::ApplicationStatus;
use d_fleet::FleetConfig;
use d_fleet::LocalClusterBackend;
use d_fleet::Result;
use d_fleet::Runnable;
use d_fleet::RunnableContext;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::net::TcpStream;

pub const ECHO_ENTRY_POINT: &str = "local-file-server";
pub const IDLE_ENTRY_POINT: &str = "idle";
pub const ECHO_SERVICE: &str = "local";
pub const WAIT_IN_SEC: u64 = 5;

/// Fast timings rooted in a per-test directory
pub fn fleet_config(root: &Path) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.staging.staging_root = root.join("staging");
    config.staging.work_root = root.join("work");
    config.discovery.heartbeat_interval_ms = 50;
    config.discovery.liveness_timeout_ms = 300;
    config.discovery.sweep_interval_ms = 50;
    config.controller.terminate_timeout_ms = 3_000;
    config.controller.stop_grace_ms = 500;
    config.controller.restart_delay_ms = 20;
    config
}

pub fn local_driver(root: &Path) -> (ApplicationDriver, Arc<LocalClusterBackend>) {
    let (driver, backend) = ApplicationDriver::local(fleet_config(root));
    backend.register_runnable(ECHO_ENTRY_POINT, Arc::new(HeaderEchoServer));
    backend.register_runnable(IDLE_ENTRY_POINT, Arc::new(Idle));
    (driver, backend)
}

/// `<root>/header/header.txt` holding `content`
pub fn header_dir(
    root: &Path,
    content: &str,
) -> PathBuf {
    let dir = root.join("header");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("header.txt"), content).unwrap();
    dir
}

/// Reads `header/header.txt` from its working directory before serving,
/// then answers every line with `<header> <line>`
pub struct HeaderEchoServer;

#[async_trait]
impl Runnable for HeaderEchoServer {
    async fn run(
        &self,
        ctx: RunnableContext,
    ) -> Result<()> {
        let header = tokio::fs::read_to_string(ctx.working_dir().join("header/header.txt")).await?;
        let header: Arc<str> = Arc::from(header.trim_end());
        ctx.info(format!("header {header}"));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        ctx.announce(ECHO_SERVICE, listener.local_addr()?)?;

        loop {
            tokio::select! {
                _ = ctx.shutdown_requested() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let header = header.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut lines = BufReader::new(read).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            if write.write_all(format!("{header} {line}\n").as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    });
                }
            }
        }
    }
}

pub struct Idle;

#[async_trait]
impl Runnable for Idle {
    async fn run(
        &self,
        ctx: RunnableContext,
    ) -> Result<()> {
        ctx.shutdown_requested().await;
        Ok(())
    }
}

pub async fn send_line(
    address: std::net::SocketAddr,
    line: &str,
) -> String {
    let mut stream = TcpStream::connect(address).await.unwrap();
    stream.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).await.unwrap();
    reply.trim_end().to_string()
}

/// Polls the controller until `predicate` holds
pub async fn wait_for_status(
    controller: &ApplicationController,
    predicate: impl Fn(&ApplicationStatus) -> bool,
) -> ApplicationStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(WAIT_IN_SEC);
    loop {
        let status = controller.status();
        if predicate(&status) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "status never matched: {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
