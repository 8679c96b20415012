use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use super::*;
use crate::test_utils::*;
use crate::ApplicationSpec;
use crate::ApplicationState;
use crate::CollectingLogHandler;
use crate::ControllerError;
use crate::Error;
use crate::FailureKind;
use crate::InstanceHandle;
use crate::InstanceState;
use crate::LocalClusterBackend;
use crate::MockClusterBackend;
use crate::RestartPolicy;
use crate::RetryPolicies;
use crate::Runnable;
use crate::RunnableSpec;

/// Binds an ephemeral port, announces it as `echo` and idles until stopped
fn announcing_server() -> Arc<dyn Runnable> {
    runnable_fn(|ctx| async move {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        ctx.announce("echo", listener.local_addr()?)?;
        ctx.info("listening");
        ctx.shutdown_requested().await;
        ctx.info("stopping");
        Ok(())
    })
}

fn single(
    name: &str,
    entry_point: &str,
    policy: RestartPolicy,
) -> ApplicationSpec {
    ApplicationSpec::builder("app")
        .runnable(
            RunnableSpec::builder(name, entry_point)
                .restart_policy(policy)
                .build(),
        )
        .any_order()
}

async fn wait_until(
    controller: &ApplicationController,
    what: &str,
    predicate: impl Fn(&ApplicationStatus) -> bool,
) -> ApplicationStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = controller.status();
        if predicate(&status) {
            return status;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}: {status:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn local_driver(root: &std::path::Path) -> (ApplicationDriver, Arc<LocalClusterBackend>) {
    let (driver, backend) = ApplicationDriver::local(test_config(root));
    backend.register_runnable("echo-server", announcing_server());
    backend.register_runnable("idle", until_shutdown());
    backend.register_runnable("broken", failing("bad config"));
    backend.register_runnable("stubborn", stubborn());
    (driver, backend)
}

#[tokio::test]
async fn test_discover_service_follows_instances_until_terminate() {
    enable_logger();
    let temp = tempfile::tempdir().unwrap();
    let (driver, backend) = local_driver(temp.path());

    let spec = ApplicationSpec::builder("app")
        .runnable(RunnableSpec::builder("server", "echo-server").instances(2).build())
        .any_order();
    let controller = driver.prepare(spec).await.unwrap();
    controller.await_running(Duration::from_secs(2)).await.unwrap();

    let mut watch = controller.discover_service("echo").unwrap();
    assert_eq!(watch.wait_for_size(2, Duration::from_secs(2)).await.unwrap(), 2);
    let addresses: Vec<_> = watch.members().iter().map(|e| e.address).collect();
    assert_ne!(addresses[0], addresses[1]);

    controller.terminate().await.unwrap();
    assert_eq!(controller.state(), ApplicationState::Stopped);
    assert_eq!(watch.wait_for_size(0, Duration::from_secs(1)).await.unwrap(), 0);
    assert!(driver
        .registry()
        .snapshot(controller.application_id(), "echo")
        .is_empty());

    assert!(matches!(
        controller.discover_service("echo"),
        Err(Error::Controller(ControllerError::Terminated(_)))
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.running_instances(), 0);
}

#[tokio::test]
async fn test_log_handlers_receive_instance_lines() {
    let temp = tempfile::tempdir().unwrap();
    let (builder, backend) = ApplicationDriver::local_builder(test_config(temp.path()));
    let from_driver = Arc::new(CollectingLogHandler::new());
    let driver = builder.log_handler(from_driver.clone()).build();
    backend.register_runnable("echo-server", announcing_server());

    let controller = driver
        .prepare(single("server", "echo-server", RestartPolicy::Never))
        .await
        .unwrap();
    controller.await_running(Duration::from_secs(2)).await.unwrap();
    while from_driver.messages().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let from_controller = Arc::new(CollectingLogHandler::new());
    controller.add_log_handler(from_controller.clone());
    controller.terminate().await.unwrap();

    assert_eq!(from_driver.messages(), vec!["listening", "stopping"]);
    assert_eq!(from_controller.messages(), vec!["stopping"]);
    let entry = &from_driver.entries()[0];
    assert_eq!(entry.application_id, controller.application_id());
    assert_eq!(entry.runnable, "server");
}

#[tokio::test]
async fn test_entry_point_error_is_reported_as_failure() {
    let temp = tempfile::tempdir().unwrap();
    let (driver, _backend) = local_driver(temp.path());

    let controller = driver
        .prepare(single("job", "broken", RestartPolicy::Never))
        .await
        .unwrap();

    let result = controller.await_running(Duration::from_secs(2)).await;
    assert!(matches!(
        result,
        Err(Error::Controller(ControllerError::ApplicationFailed { failed: 1, .. }))
    ));

    let failed = controller.failed_instances();
    assert_eq!(failed[0].kind, FailureKind::EntryPoint);
    assert!(failed[0].reason.contains("bad config"));
    assert_eq!(controller.await_terminated().await.unwrap(), ApplicationState::Stopped);
}

#[tokio::test]
async fn test_lost_instance_is_restarted_under_limited_policy() {
    enable_logger();
    let temp = tempfile::tempdir().unwrap();
    let (driver, backend) = local_driver(temp.path());

    let controller = driver
        .prepare(single("worker", "idle", RestartPolicy::Limited(1)))
        .await
        .unwrap();
    controller.await_running(Duration::from_secs(2)).await.unwrap();
    let first = controller.status().instances[0].instance_id.clone();

    assert!(backend.kill_silently(&first));

    let status = wait_until(&controller, "replacement", |s| {
        s.instances.len() == 2 && s.all_running
    })
    .await;
    assert_eq!(status.failures.len(), 1);
    assert_eq!(status.failures[0].kind, FailureKind::LivenessTimeout);
    assert!(!status.failures[0].terminal);
    let replacement = status.instances.iter().find(|r| r.instance_id != first).unwrap();
    assert_eq!(replacement.attempt, 1);
    assert_eq!(replacement.replica, 0);

    controller.terminate().await.unwrap();
}

#[tokio::test]
async fn test_lost_instance_fails_without_restart_budget() {
    let temp = tempfile::tempdir().unwrap();
    let (driver, backend) = local_driver(temp.path());

    let controller = driver
        .prepare(single("server", "echo-server", RestartPolicy::Never))
        .await
        .unwrap();
    controller.await_running(Duration::from_secs(2)).await.unwrap();
    let instance_id = controller.status().instances[0].instance_id.clone();
    let mut watch = controller.discover_service("echo").unwrap();
    watch.wait_for_size(1, Duration::from_secs(1)).await.unwrap();

    backend.kill_silently(&instance_id);

    // the registration disappears once liveness runs out
    watch.wait_for_size(0, Duration::from_secs(2)).await.unwrap();
    let state = tokio::time::timeout(Duration::from_secs(2), controller.await_terminated())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, ApplicationState::Stopped);

    let failed = controller.failed_instances();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].kind, FailureKind::LivenessTimeout);
    assert_eq!(controller.status().count_in(InstanceState::Failed), 1);
}

#[tokio::test]
async fn test_terminate_times_out_then_cleanup_completes() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.controller.terminate_timeout_ms = 200;
    config.controller.stop_grace_ms = 600;
    let (driver, backend) = ApplicationDriver::local(config);
    backend.register_runnable("stubborn", stubborn());

    let controller = driver
        .prepare(single("mule", "stubborn", RestartPolicy::Always))
        .await
        .unwrap();
    controller.await_running(Duration::from_secs(2)).await.unwrap();

    let result = controller.terminate().await;
    assert!(matches!(result, Err(Error::TerminationTimeout { remaining: 1, .. })));
    assert_eq!(controller.state(), ApplicationState::Stopping);

    // the kill after the stop grace finishes the job
    let state = tokio::time::timeout(Duration::from_secs(3), controller.await_terminated())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, ApplicationState::Stopped);
    assert!(controller.failed_instances().is_empty());
    assert_eq!(controller.status().instances.len(), 1);
    assert_eq!(backend.running_instances(), 0);
}

#[tokio::test]
async fn test_await_running_times_out_while_starting() {
    let temp = tempfile::tempdir().unwrap();
    let mut backend = MockClusterBackend::new();
    backend.expect_request_instance().returning(|request| {
        Ok(InstanceHandle {
            instance_id: request.instance_id.clone(),
            backend_ref: "mock".into(),
        })
    });
    backend.expect_signal().returning(|_, _| Ok(()));
    backend.expect_release().returning(|_| Ok(()));
    let driver = ApplicationDriver::new(mock_config(temp.path()), Arc::new(backend));

    let controller = driver
        .prepare(single("slow", "noop", RestartPolicy::Never))
        .await
        .unwrap();

    let result = controller.await_running(Duration::from_millis(100)).await;
    assert!(matches!(
        result,
        Err(Error::Controller(ControllerError::AwaitRunningTimeout { .. }))
    ));
    assert_eq!(controller.state(), ApplicationState::Starting);
    assert_eq!(controller.status().count_in(InstanceState::Starting), 1);
}

#[tokio::test]
async fn test_instance_silent_while_starting_fails_on_liveness() {
    let temp = tempfile::tempdir().unwrap();
    let mut backend = MockClusterBackend::new();
    backend.expect_request_instance().times(1).returning(|request| {
        Ok(InstanceHandle {
            instance_id: request.instance_id.clone(),
            backend_ref: "mock".into(),
        })
    });
    backend.expect_signal().returning(|_, _| Ok(()));
    backend.expect_release().returning(|_| Ok(()));
    let driver = ApplicationDriver::new(test_config(temp.path()), Arc::new(backend));

    let controller = driver
        .prepare(single("ghost", "noop", RestartPolicy::Never))
        .await
        .unwrap();

    let state = tokio::time::timeout(Duration::from_secs(3), controller.await_terminated())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, ApplicationState::Stopped);

    let failed = controller.failed_instances();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].kind, FailureKind::LivenessTimeout);
    assert_eq!(controller.status().count_in(InstanceState::Starting), 0);
}

#[tokio::test]
async fn test_unknown_entry_point_is_requested_once_with_default_retries() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.retry.launch = RetryPolicies::default().launch;
    let (driver, backend) = ApplicationDriver::local(config);

    let controller = driver
        .prepare(single("job", "not-registered", RestartPolicy::Never))
        .await
        .unwrap();

    let result = controller.await_running(Duration::from_secs(2)).await;
    assert!(matches!(
        result,
        Err(Error::Controller(ControllerError::ApplicationFailed { failed: 1, .. }))
    ));
    assert_eq!(controller.failed_instances()[0].kind, FailureKind::Launch);
    assert_eq!(backend.request_count(), 1);
}

#[tokio::test]
async fn test_settled_application_leaves_no_working_dirs() {
    let temp = tempfile::tempdir().unwrap();
    let (driver, backend) = local_driver(temp.path());

    let spec = ApplicationSpec::builder("app")
        .runnable(RunnableSpec::builder("worker", "idle").instances(2).build())
        .runnable(RunnableSpec::builder("mule", "stubborn").build())
        .any_order();
    let controller = driver.prepare(spec).await.unwrap();
    controller.await_running(Duration::from_secs(2)).await.unwrap();

    let app_dir = temp.path().join("work").join(controller.application_id());
    assert_eq!(std::fs::read_dir(&app_dir).unwrap().count(), 3);

    let state = tokio::time::timeout(Duration::from_secs(3), async {
        let _ = controller.terminate().await;
        controller.await_terminated().await
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(state, ApplicationState::Stopped);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while app_dir.exists() {
        assert!(tokio::time::Instant::now() < deadline, "{app_dir:?} still present");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(backend.running_instances(), 0);
}
