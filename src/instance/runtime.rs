use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ExitOutcome;
use super::FailureKind;
use super::InstanceIdentity;
use super::Runnable;
use super::RunnableContext;
use crate::DiscoveryRegistry;
use crate::LaunchRequest;
use crate::ResourceDistributor;

/// Drives one instance on the executing side: materialize, heartbeat, run the
/// entry point, clean up.
#[derive(Debug, Clone)]
pub(crate) struct InstanceRuntime {
    distributor: ResourceDistributor,
    registry: DiscoveryRegistry,
    heartbeat_interval: Duration,
}

impl InstanceRuntime {
    pub(crate) fn new(
        distributor: ResourceDistributor,
        registry: DiscoveryRegistry,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            distributor,
            registry,
            heartbeat_interval,
        }
    }

    /// Runs the instance to completion. Every outcome is reported through
    /// `request.reporter`; nothing is returned.
    pub(crate) async fn run(
        &self,
        request: LaunchRequest,
        entry_point: Arc<dyn Runnable>,
        working_dir: PathBuf,
        shutdown: CancellationToken,
    ) {
        let reporter = request.reporter.clone();
        let instance_id = request.instance_id.clone();

        if let Err(e) = tokio::fs::create_dir_all(&working_dir).await {
            error!(%instance_id, ?working_dir, "cannot create working directory: {}", e);
            reporter.failed(FailureKind::Materialization, e.to_string());
            return;
        }

        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // staging large bundles may outlast the liveness timeout
        for bundle in request.bundles.iter() {
            if shutdown.is_cancelled() {
                info!(%instance_id, "stopped before start");
                self.registry.deregister_instance(&instance_id);
                reporter.exited(ExitOutcome::Completed);
                return;
            }
            let materialize = self.distributor.materialize(bundle, &working_dir);
            tokio::pin!(materialize);
            let materialized = loop {
                tokio::select! {
                    result = &mut materialize => break result,
                    _ = ticker.tick() => self.registry.heartbeat(&instance_id),
                }
            };
            if let Err(e) = materialized {
                error!(%instance_id, bundle = %bundle.name, "materialization failed: {}", e);
                self.registry.deregister_instance(&instance_id);
                reporter.failed(FailureKind::Materialization, e.to_string());
                return;
            }
        }

        self.registry.heartbeat(&instance_id);
        reporter.running();
        info!(
            %instance_id,
            runnable = %request.runnable.name,
            attempt = request.attempt,
            "instance running"
        );

        let ctx = RunnableContext::new(
            InstanceIdentity {
                application_id: request.application_id.clone(),
                runnable: request.runnable.name.clone(),
                instance_id: instance_id.clone(),
                replica: request.replica,
                attempt: request.attempt,
            },
            working_dir,
            request.application_args.clone(),
            request.runnable.arguments.clone(),
            request.runnable.env.clone(),
            self.registry.clone(),
            reporter.clone(),
            shutdown,
        );

        let run = AssertUnwindSafe(entry_point.run(ctx)).catch_unwind();
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = ticker.tick() => self.registry.heartbeat(&instance_id),
            }
        };

        reporter.exit_requested();
        let removed = self.registry.deregister_instance(&instance_id);
        debug!(%instance_id, removed, "instance deregistered");

        let outcome = match result {
            Ok(Ok(())) => ExitOutcome::Completed,
            Ok(Err(e)) => {
                warn!(%instance_id, "entry point failed: {}", e);
                ExitOutcome::Failed {
                    kind: FailureKind::EntryPoint,
                    reason: e.to_string(),
                }
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(%instance_id, "entry point panicked: {}", reason);
                ExitOutcome::Failed {
                    kind: FailureKind::EntryPoint,
                    reason,
                }
            }
        };
        reporter.exited(outcome);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
