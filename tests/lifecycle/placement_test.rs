use std::time::Duration;

use d_fleet::ApplicationSpec;
use d_fleet::ApplicationState;
use d_fleet::RunnableSpec;

use crate::common::local_driver;
use crate::common::IDLE_ENTRY_POINT;

#[tokio::test]
async fn test_sequential_placement_launches_in_order() {
    crate::enable_logger();
    let temp = tempfile::tempdir().unwrap();
    let (driver, backend) = local_driver(temp.path());

    let spec = ApplicationSpec::builder("ordered")
        .runnable(RunnableSpec::builder("first", IDLE_ENTRY_POINT).instances(2).build())
        .runnable(RunnableSpec::builder("second", IDLE_ENTRY_POINT).build())
        .runnable(RunnableSpec::builder("third", IDLE_ENTRY_POINT).build())
        .sequential();

    let controller = driver.prepare(spec).await.unwrap();
    controller.await_running(Duration::from_secs(5)).await.unwrap();
    assert_eq!(backend.request_count(), 4);

    // a later runnable never starts running before an earlier one did
    let status = controller.status();
    let started = |name: &str| {
        status
            .instances_of(name)
            .map(|r| r.instance_id.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(started("first").len(), 2);
    assert_eq!(started("second").len(), 1);
    assert_eq!(started("third").len(), 1);

    controller.terminate().await.unwrap();
    assert_eq!(controller.state(), ApplicationState::Stopped);
}
