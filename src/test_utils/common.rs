use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::FleetConfig;
use crate::InstanceEvent;
use crate::InstanceReporter;
use crate::LaunchRequest;
use crate::RunnableSpec;
use crate::StagedBundle;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Config rooted in `root`, with timings short enough for tests
pub fn test_config(root: &Path) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.staging.staging_root = root.join("staging");
    config.staging.work_root = root.join("work");
    config.discovery.heartbeat_interval_ms = 50;
    config.discovery.liveness_timeout_ms = 300;
    config.discovery.sweep_interval_ms = 50;
    config.controller.terminate_timeout_ms = 3_000;
    config.controller.stop_grace_ms = 300;
    config.controller.restart_delay_ms = 20;
    config.retry.launch.max_retries = 1;
    config.retry.launch.base_delay_ms = 10;
    config.retry.launch.max_delay_ms = 10;
    config
}

/// `test_config` for backends that never heartbeat on their own
pub fn mock_config(root: &Path) -> FleetConfig {
    let mut config = test_config(root);
    config.discovery.liveness_timeout_ms = 60_000;
    config
}

/// Launch request for replica 0 of `runnable`, with its report channel
pub fn launch_request(
    application_id: &str,
    instance_id: &str,
    runnable: RunnableSpec,
    bundles: Vec<StagedBundle>,
) -> (LaunchRequest, mpsc::UnboundedReceiver<InstanceEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let request = LaunchRequest {
        application_id: application_id.to_string(),
        instance_id: instance_id.to_string(),
        replica: 0,
        attempt: 0,
        runnable: Arc::new(runnable),
        application_args: Arc::new(vec!["app-arg".to_string()]),
        bundles: Arc::new(bundles),
        reporter: InstanceReporter::new(instance_id, tx),
    };
    (request, rx)
}
