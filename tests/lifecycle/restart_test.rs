use std::time::Duration;

use d_fleet::ApplicationSpec;
use d_fleet::ApplicationState;
use d_fleet::FailureKind;
use d_fleet::RestartPolicy;
use d_fleet::RunnableSpec;

use crate::common::header_dir;
use crate::common::local_driver;
use crate::common::wait_for_status;
use crate::common::ECHO_ENTRY_POINT;
use crate::common::ECHO_SERVICE;
use crate::common::IDLE_ENTRY_POINT;

/// A silently dead instance leaves discovery within the staleness bound
#[tokio::test]
async fn test_silent_death_expires_from_discovery() {
    crate::enable_logger();
    let temp = tempfile::tempdir().unwrap();
    let header = header_dir(temp.path(), "h");
    let (driver, backend) = local_driver(temp.path());

    let spec = ApplicationSpec::builder("expiring")
        .runnable(
            RunnableSpec::builder("server", ECHO_ENTRY_POINT)
                .bundle(d_fleet::ResourceBundle::archive("header", &header))
                .build(),
        )
        .any_order();
    let controller = driver.prepare(spec).await.unwrap();
    let mut watch = controller.discover_service(ECHO_SERVICE).unwrap();
    watch.wait_for_size(1, Duration::from_secs(5)).await.unwrap();

    let instance_id = watch.members()[0].instance_id.clone();
    assert!(backend.kill_silently(&instance_id));

    let bound = driver.config().discovery.staleness_bound() + Duration::from_millis(200);
    assert_eq!(watch.wait_for_size(0, bound).await.unwrap(), 0);

    let status = wait_for_status(&controller, |s| s.settled).await;
    assert_eq!(status.state, ApplicationState::Stopped);
    assert_eq!(status.failures[0].kind, FailureKind::LivenessTimeout);
}

#[tokio::test]
async fn test_limited_restart_replaces_lost_instance_then_gives_up() {
    let temp = tempfile::tempdir().unwrap();
    let (driver, backend) = local_driver(temp.path());

    let spec = ApplicationSpec::builder("restarting")
        .runnable(
            RunnableSpec::builder("worker", IDLE_ENTRY_POINT)
                .restart_policy(RestartPolicy::Limited(1))
                .build(),
        )
        .any_order();
    let controller = driver.prepare(spec).await.unwrap();
    controller.await_running(Duration::from_secs(5)).await.unwrap();

    let first = controller.status().instances[0].instance_id.clone();
    backend.kill_silently(&first);
    let status = wait_for_status(&controller, |s| s.instances.len() == 2 && s.all_running).await;
    let second = status
        .instances
        .iter()
        .find(|r| r.instance_id != first)
        .map(|r| r.instance_id.clone())
        .unwrap();

    backend.kill_silently(&second);
    let status = wait_for_status(&controller, |s| s.settled).await;
    assert_eq!(status.instances.len(), 2);
    assert_eq!(status.failures.len(), 2);
    assert_eq!(status.terminal_failures().count(), 1);
    assert_eq!(controller.failed_instances()[0].instance_id, second);
    assert_eq!(backend.request_count(), 2);
}
