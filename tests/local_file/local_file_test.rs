use std::time::Duration;

use d_fleet::ApplicationSpec;
use d_fleet::ApplicationState;
use d_fleet::CollectingLogHandler;
use d_fleet::Error;
use d_fleet::InstanceState;
use d_fleet::ResourceBundle;
use d_fleet::RunnableSpec;

use crate::common::header_dir;
use crate::common::local_driver;
use crate::common::send_line;
use crate::common::ECHO_ENTRY_POINT;
use crate::common::ECHO_SERVICE;

const HEADER: &str = "Local file header";

/// Ships a directory as an archive bundle, reads it from the instance, echoes
/// over TCP and checks discovery goes 1 -> 0 across terminate
#[tokio::test]
async fn test_local_file_echo_application() {
    crate::enable_logger();
    let temp = tempfile::tempdir().unwrap();
    let header = header_dir(temp.path(), &format!("{HEADER}\n"));
    let (driver, backend) = local_driver(temp.path());

    let spec = ApplicationSpec::builder("LocalFileApp")
        .arguments(["local"])
        .runnable(
            RunnableSpec::builder("LocalFileSocketServer", ECHO_ENTRY_POINT)
                .arguments(["local2"])
                .bundle(ResourceBundle::archive("header", &header))
                .build(),
        )
        .any_order();

    let controller = driver.prepare(spec).await.unwrap();
    let logs = std::sync::Arc::new(CollectingLogHandler::new());
    controller.add_log_handler(logs.clone());

    let mut watch = controller.discover_service(ECHO_SERVICE).unwrap();
    assert_eq!(watch.wait_for_size(1, Duration::from_secs(5)).await.unwrap(), 1);
    controller.await_running(Duration::from_secs(5)).await.unwrap();

    let members = watch.members();
    let reply = send_line(members[0].address, "Hello World").await;
    assert_eq!(reply, format!("{HEADER} Hello World"));

    // the source may change after prepare without affecting the instance
    std::fs::write(header.join("header.txt"), "changed\n").unwrap();
    assert_eq!(
        send_line(members[0].address, "again").await,
        format!("{HEADER} again")
    );

    controller.terminate().await.unwrap();
    assert_eq!(watch.wait_for_size(0, Duration::from_secs(1)).await.unwrap(), 0);
    assert_eq!(controller.state(), ApplicationState::Stopped);
    assert_eq!(controller.status().count_in(InstanceState::Stopped), 1);
    assert_eq!(backend.request_count(), 1);
    assert!(logs
        .messages()
        .iter()
        .all(|m| m.starts_with("header ") && m.ends_with(HEADER)));

    // the working directory goes with the instance
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.running_instances(), 0);
}

#[tokio::test]
async fn test_missing_bundle_source_fails_prepare_without_requests() {
    let temp = tempfile::tempdir().unwrap();
    let (driver, backend) = local_driver(temp.path());

    let spec = ApplicationSpec::builder("LocalFileApp")
        .runnable(
            RunnableSpec::builder("LocalFileSocketServer", ECHO_ENTRY_POINT)
                .bundle(ResourceBundle::archive("header", temp.path().join("no-such-dir")))
                .build(),
        )
        .any_order();

    let result = driver.prepare(spec).await;
    assert!(matches!(result, Err(Error::ResourceStaging(_))));
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test]
async fn test_every_replica_gets_its_own_copy() {
    let temp = tempfile::tempdir().unwrap();
    let header = header_dir(temp.path(), HEADER);
    let (driver, _backend) = local_driver(temp.path());

    let spec = ApplicationSpec::builder("LocalFileApp")
        .runnable(
            RunnableSpec::builder("LocalFileSocketServer", ECHO_ENTRY_POINT)
                .instances(3)
                .bundle(ResourceBundle::archive("header", &header).read_only())
                .build(),
        )
        .any_order();

    let controller = driver.prepare(spec).await.unwrap();
    let mut watch = controller.discover_service(ECHO_SERVICE).unwrap();
    watch.wait_for_size(3, Duration::from_secs(5)).await.unwrap();

    for member in watch.members() {
        assert_eq!(send_line(member.address, "ping").await, format!("{HEADER} ping"));
    }

    controller.terminate().await.unwrap();
    assert!(watch.wait_for_size(0, Duration::from_secs(1)).await.is_ok());
}

/// Announces `checker` only when `payload.bin` matches what was submitted
struct PayloadChecker {
    expected: Vec<u8>,
}

#[async_trait::async_trait]
impl d_fleet::Runnable for PayloadChecker {
    async fn run(
        &self,
        ctx: d_fleet::RunnableContext,
    ) -> d_fleet::Result<()> {
        let actual = tokio::fs::read(ctx.working_dir().join("payload.bin")).await?;
        if actual != self.expected {
            return Err(d_fleet::Error::Fatal("payload differs".into()));
        }
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        ctx.announce("checker", listener.local_addr()?)?;
        ctx.shutdown_requested().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_file_bundle_is_identical_before_entry_point_runs() {
    let temp = tempfile::tempdir().unwrap();
    // larger than one copy buffer
    let payload: Vec<u8> = (0..300_000u32).map(|i| (i * 31 % 251) as u8).collect();
    let source = temp.path().join("payload.bin");
    std::fs::write(&source, &payload).unwrap();

    let (driver, backend) = local_driver(temp.path());
    backend.register_runnable(
        "checker",
        std::sync::Arc::new(PayloadChecker {
            expected: payload.clone(),
        }),
    );

    let spec = ApplicationSpec::builder("PayloadApp")
        .runnable(
            RunnableSpec::builder("checker", "checker")
                .bundle(ResourceBundle::file("payload.bin", &source))
                .build(),
        )
        .any_order();
    let controller = driver.prepare(spec).await.unwrap();

    // submitted content is already captured
    std::fs::write(&source, b"overwritten").unwrap();

    let mut watch = controller.discover_service("checker").unwrap();
    watch.wait_for_size(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(
        driver.registry().snapshot(controller.application_id(), "checker").len(),
        1
    );
    assert!(controller.failed_instances().is_empty());

    controller.terminate().await.unwrap();
    assert!(driver
        .registry()
        .snapshot(controller.application_id(), "checker")
        .is_empty());
    assert_eq!(controller.state(), ApplicationState::Stopped);
}
