use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ClusterBackend;
use super::InstanceHandle;
use super::InstanceSignal;
use super::LaunchRequest;
use crate::instance::InstanceRuntime;
use crate::utils::file_io::remove_path_if_exists;
use crate::DiscoveryRegistry;
use crate::FailureKind;
use crate::FleetConfig;
use crate::InstanceReporter;
use crate::LaunchError;
use crate::ResourceDistributor;
use crate::Result;
use crate::Runnable;

struct LocalInstance {
    application_id: String,
    working_dir: PathBuf,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    reporter: InstanceReporter,
}

impl LocalInstance {
    fn handle(
        &self,
        instance_id: &str,
    ) -> InstanceHandle {
        InstanceHandle {
            instance_id: instance_id.to_string(),
            backend_ref: format!("local:{}", self.working_dir.display()),
        }
    }

    /// Aborts the task and removes its working directory once it is gone
    async fn abort(self) {
        let LocalInstance { task, working_dir, .. } = self;
        task.abort();
        let _ = task.await;
        remove_path_if_exists(&working_dir).await;
    }
}

/// Runs every instance as a tokio task in this process, each in its own
/// working directory under `staging.work_root`.
///
/// Entry points are resolved by name from runnables registered with
/// `register_runnable`.
pub struct LocalClusterBackend {
    runnables: DashMap<String, Arc<dyn Runnable>>,
    instances: Arc<DashMap<String, LocalInstance>>,
    runtime: InstanceRuntime,
    work_root: PathBuf,
    requests: AtomicUsize,
}

impl std::fmt::Debug for LocalClusterBackend {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LocalClusterBackend")
            .field("runnables", &self.runnables.len())
            .field("instances", &self.instances.len())
            .field("work_root", &self.work_root)
            .finish()
    }
}

impl LocalClusterBackend {
    pub fn new(
        config: &FleetConfig,
        distributor: ResourceDistributor,
        registry: DiscoveryRegistry,
    ) -> Self {
        Self {
            runnables: DashMap::new(),
            instances: Arc::new(DashMap::new()),
            runtime: InstanceRuntime::new(
                distributor,
                registry,
                config.discovery.heartbeat_interval(),
            ),
            work_root: config.staging.work_root.clone(),
            requests: AtomicUsize::new(0),
        }
    }

    /// Makes `runnable` launchable under the entry point `name`
    pub fn register_runnable(
        &self,
        name: impl Into<String>,
        runnable: Arc<dyn Runnable>,
    ) {
        let name = name.into();
        debug!(entry_point = %name, "runnable registered");
        self.runnables.insert(name, runnable);
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Launch requests received so far, accepted or not
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn running_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.instances.iter().map(|r| r.key().clone()).collect()
    }

    /// Aborts an instance without telling anyone, as a crashed host would.
    /// Its heartbeats stop and its registry entries stay until they expire.
    pub fn kill_silently(
        &self,
        instance_id: &str,
    ) -> bool {
        match self.instances.remove(instance_id) {
            Some((_, instance)) => {
                warn!(instance_id, "instance killed silently");
                tokio::spawn(instance.abort());
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ClusterBackend for LocalClusterBackend {
    async fn request_instance(
        &self,
        request: LaunchRequest,
    ) -> Result<InstanceHandle> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if let Some(existing) = self.instances.get(&request.instance_id) {
            debug!(instance_id = %request.instance_id, "instance already launched");
            return Ok(existing.handle(&request.instance_id));
        }

        let entry_point = self
            .runnables
            .get(&request.runnable.entry_point)
            .map(|r| r.value().clone())
            .ok_or_else(|| LaunchError::UnknownEntryPoint(request.runnable.entry_point.clone()))?;

        let instance_id = request.instance_id.clone();
        let request_application_id = request.application_id.clone();
        let working_dir = self.work_root.join(&request.application_id).join(&instance_id);
        let shutdown = CancellationToken::new();
        let reporter = request.reporter.clone();

        // the task waits until it is tracked, so its own removal cannot race the insert
        let (tracked_tx, tracked_rx) = oneshot::channel::<()>();
        let runtime = self.runtime.clone();
        let instances = self.instances.clone();
        let task_shutdown = shutdown.clone();
        let task_dir = working_dir.clone();
        let task_id = instance_id.clone();
        let task = tokio::spawn(async move {
            if tracked_rx.await.is_err() {
                return;
            }
            runtime.run(request, entry_point, task_dir.clone(), task_shutdown).await;
            remove_path_if_exists(&task_dir).await;
            instances.remove(&task_id);
        });

        let instance = LocalInstance {
            application_id: request_application_id,
            working_dir: working_dir.clone(),
            shutdown,
            task,
            reporter,
        };
        let handle = instance.handle(&instance_id);
        self.instances.insert(instance_id.clone(), instance);
        let _ = tracked_tx.send(());

        info!(%instance_id, ?working_dir, "local instance launched");
        Ok(handle)
    }

    async fn signal(
        &self,
        handle: &InstanceHandle,
        signal: InstanceSignal,
    ) -> Result<()> {
        match signal {
            InstanceSignal::Stop => {
                if let Some(instance) = self.instances.get(&handle.instance_id) {
                    debug!(instance_id = %handle.instance_id, "stop requested");
                    instance.shutdown.cancel();
                }
            }
            InstanceSignal::Kill => {
                if let Some((_, instance)) = self.instances.remove(&handle.instance_id) {
                    warn!(instance_id = %handle.instance_id, "killing instance");
                    instance.reporter.failed(FailureKind::Killed, "killed by backend");
                    tokio::spawn(instance.abort());
                }
            }
        }
        Ok(())
    }

    async fn release(
        &self,
        application_id: &str,
    ) -> Result<()> {
        let leftovers: Vec<String> = self
            .instances
            .iter()
            .filter(|r| r.application_id == application_id)
            .map(|r| r.key().clone())
            .collect();
        for instance_id in leftovers {
            if let Some((_, instance)) = self.instances.remove(&instance_id) {
                debug!(%instance_id, "aborting instance of released application");
                instance.abort().await;
            }
        }

        let app_dir = self.work_root.join(application_id);
        remove_path_if_exists(&app_dir).await;
        debug!(application_id, "application released");
        Ok(())
    }
}
