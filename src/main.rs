use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use d_fleet::ApplicationDriver;
use d_fleet::ApplicationSpec;
use d_fleet::Error;
use d_fleet::FleetConfig;
use d_fleet::LoggingConfig;
use d_fleet::ResourceBundle;
use d_fleet::Result;
use d_fleet::Runnable;
use d_fleet::RunnableContext;
use d_fleet::RunnableSpec;
use d_fleet::SystemError;
use d_fleet::TracingLogHandler;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

const ENTRY_POINT: &str = "local-file-server";
const SERVICE: &str = "local";

/// Serves `header/header.txt` followed by an echo of each line it receives
struct LocalFileServer;

#[async_trait]
impl Runnable for LocalFileServer {
    async fn run(
        &self,
        ctx: RunnableContext,
    ) -> Result<()> {
        let header = tokio::fs::read_to_string(ctx.working_dir().join("header/header.txt")).await?;
        let header: Arc<str> = Arc::from(header.trim_end());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let _registration = ctx.announce(SERVICE, address)?;
        ctx.info(format!(
            "serving on {address} (arguments {:?} {:?})",
            ctx.application_arguments(),
            ctx.arguments()
        ));

        loop {
            tokio::select! {
                _ = ctx.shutdown_requested() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let header = header.clone();
                    tokio::spawn(async move {
                        if let Err(e) = echo(stream, &header).await {
                            debug!(%peer, "connection ended: {}", e);
                        }
                    });
                }
            }
        }

        ctx.info("stopped serving");
        Ok(())
    }
}

async fn echo(
    stream: TcpStream,
    header: &str,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        write.write_all(format!("{header} {line}\n").as_bytes()).await?;
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let config = FleetConfig::new()?.validate()?;

    let _guard = init_observability(&config.logging)?;

    let (graceful_tx, mut graceful_rx) = watch::channel(());
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    let (builder, backend) = ApplicationDriver::local_builder(config);
    let driver = builder.log_handler(Arc::new(TracingLogHandler)).build();
    backend.register_runnable(ENTRY_POINT, Arc::new(LocalFileServer));

    let header_dir = write_demo_header()?;
    let spec = ApplicationSpec::builder("LocalFileApp")
        .arguments(["local"])
        .runnable(
            RunnableSpec::builder("LocalFileSocketServer", ENTRY_POINT)
                .arguments(["local2"])
                .bundle(ResourceBundle::archive("header", header_dir))
                .build(),
        )
        .any_order();

    let controller = driver.prepare(spec).await?;
    controller.await_running(Duration::from_secs(30)).await?;

    let mut members = controller.discover_service(SERVICE)?;
    members.wait_for_size(1, Duration::from_secs(30)).await?;
    for entry in members.members() {
        let reply = say_hello(entry.address).await?;
        info!(instance_id = %entry.instance_id, %reply, "echo reply");
    }

    info!("Application running. Waiting for CTRL+C signal...");
    if graceful_rx.changed().await.is_err() {
        warn!("shutdown listener gone");
    }

    if let Err(e) = controller.terminate().await {
        error!("terminate failed: {}", e);
    }
    let remaining = members.wait_for_size(0, Duration::from_secs(5)).await?;
    info!(remaining, state = %controller.state(), "application finished");
    driver.shutdown();

    println!("Exiting program.");
    Ok(())
}

async fn say_hello(address: std::net::SocketAddr) -> Result<String> {
    let mut stream = TcpStream::connect(address).await?;
    stream.write_all(b"Hello World\n").await?;
    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).await?;
    Ok(reply.trim_end().to_string())
}

/// Directory bundle for the demo: `header.txt` with a single greeting line
fn write_demo_header() -> Result<PathBuf> {
    let dir = std::env::temp_dir().join("d-fleet/demo/header");
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("header.txt"), "Local file header\n")?;
    Ok(dir)
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::System(SystemError::SignalSendFailed(format!(
            "Failed to send shutdown signal: {}",
            e
        )))
    })?;

    Ok(())
}

pub fn init_observability(logging: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&logging.log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logging.log_file())?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
