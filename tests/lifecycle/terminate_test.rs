use std::time::Duration;

use d_fleet::ApplicationSpec;
use d_fleet::ApplicationState;
use d_fleet::ControllerError;
use d_fleet::Error;
use d_fleet::InstanceState;
use d_fleet::RunnableSpec;

use crate::common::local_driver;
use crate::common::IDLE_ENTRY_POINT;

#[tokio::test]
async fn test_concurrent_terminate_is_idempotent() {
    crate::enable_logger();
    let temp = tempfile::tempdir().unwrap();
    let (driver, backend) = local_driver(temp.path());

    let spec = ApplicationSpec::builder("idle")
        .runnable(RunnableSpec::builder("a", IDLE_ENTRY_POINT).instances(3).build())
        .runnable(RunnableSpec::builder("b", IDLE_ENTRY_POINT).build())
        .any_order();
    let controller = driver.prepare(spec).await.unwrap();
    controller.await_running(Duration::from_secs(5)).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.terminate().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(controller.state(), ApplicationState::Stopped);
    assert_eq!(controller.status().count_in(InstanceState::Stopped), 4);
    assert!(controller.failed_instances().is_empty());
    assert_eq!(controller.terminate().await.ok(), Some(()));
    assert_eq!(backend.request_count(), 4);

    assert!(matches!(
        controller.await_running(Duration::from_millis(100)).await,
        Err(Error::Controller(ControllerError::Terminated(_)))
    ));
}
