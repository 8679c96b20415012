use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::info;

use super::supervisor::Supervisor;
use super::ApplicationController;
use super::ApplicationStatus;
use crate::log_handler::LogHandlers;
use crate::utils::async_task::spawn_task;
use crate::utils::generate_id;
use crate::ApplicationSpec;
use crate::ClusterBackend;
use crate::DiscoveryRegistry;
use crate::FleetConfig;
use crate::InstanceFailure;
use crate::LocalClusterBackend;
use crate::LogHandler;
use crate::ResourceDistributor;
use crate::Result;

/// Called on every instance failure, restarted or not
pub type FailureReporter = Arc<dyn Fn(&InstanceFailure) + Send + Sync>;

/// What every supervisor spawned by one driver shares
#[derive(Clone)]
pub(crate) struct DriverShared {
    pub(crate) config: Arc<FleetConfig>,
    pub(crate) backend: Arc<dyn ClusterBackend>,
    pub(crate) registry: DiscoveryRegistry,
    pub(crate) distributor: ResourceDistributor,
    pub(crate) on_failure: Option<FailureReporter>,
}

/// Turns application specs into running instances on a cluster backend.
///
/// Owns the resource distributor and the discovery registry. The registry's
/// liveness sweeper starts with the driver, so a driver must be built inside
/// a tokio runtime.
pub struct ApplicationDriver {
    shared: DriverShared,
    log_handlers: Vec<Arc<dyn LogHandler>>,
}

impl std::fmt::Debug for ApplicationDriver {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ApplicationDriver")
            .field("config", &self.shared.config)
            .field("registry", &self.shared.registry)
            .field("log_handlers", &self.log_handlers.len())
            .finish()
    }
}

pub struct ApplicationDriverBuilder {
    config: FleetConfig,
    backend: Arc<dyn ClusterBackend>,
    registry: Option<DiscoveryRegistry>,
    distributor: Option<ResourceDistributor>,
    log_handlers: Vec<Arc<dyn LogHandler>>,
    on_failure: Option<FailureReporter>,
}

impl ApplicationDriverBuilder {
    /// Share an existing registry, e.g. with the backend
    pub fn registry(
        mut self,
        registry: DiscoveryRegistry,
    ) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn distributor(
        mut self,
        distributor: ResourceDistributor,
    ) -> Self {
        self.distributor = Some(distributor);
        self
    }

    /// Handler attached to every application this driver prepares
    pub fn log_handler(
        mut self,
        handler: Arc<dyn LogHandler>,
    ) -> Self {
        self.log_handlers.push(handler);
        self
    }

    pub fn on_failure(
        mut self,
        reporter: impl Fn(&InstanceFailure) + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Arc::new(reporter));
        self
    }

    pub fn build(self) -> ApplicationDriver {
        let registry = self
            .registry
            .unwrap_or_else(|| DiscoveryRegistry::new(self.config.discovery.clone()));
        let distributor = self
            .distributor
            .unwrap_or_else(|| ResourceDistributor::new(self.config.staging.clone()));
        registry.start();

        ApplicationDriver {
            shared: DriverShared {
                config: Arc::new(self.config),
                backend: self.backend,
                registry,
                distributor,
                on_failure: self.on_failure,
            },
            log_handlers: self.log_handlers,
        }
    }
}

impl ApplicationDriver {
    pub fn new(
        config: FleetConfig,
        backend: Arc<dyn ClusterBackend>,
    ) -> Self {
        Self::builder(config, backend).build()
    }

    pub fn builder(
        config: FleetConfig,
        backend: Arc<dyn ClusterBackend>,
    ) -> ApplicationDriverBuilder {
        ApplicationDriverBuilder {
            config,
            backend,
            registry: None,
            distributor: None,
            log_handlers: Vec::new(),
            on_failure: None,
        }
    }

    /// Driver on an in-process backend sharing its registry and distributor.
    /// Register entry points on the returned backend before preparing.
    pub fn local(config: FleetConfig) -> (Self, Arc<LocalClusterBackend>) {
        let (builder, backend) = Self::local_builder(config);
        (builder.build(), backend)
    }

    pub fn local_builder(config: FleetConfig) -> (ApplicationDriverBuilder, Arc<LocalClusterBackend>) {
        let registry = DiscoveryRegistry::new(config.discovery.clone());
        let distributor = ResourceDistributor::new(config.staging.clone());
        let backend = Arc::new(LocalClusterBackend::new(
            &config,
            distributor.clone(),
            registry.clone(),
        ));
        let builder = Self::builder(config, backend.clone())
            .registry(registry)
            .distributor(distributor);
        (builder, backend)
    }

    pub fn config(&self) -> &FleetConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &DiscoveryRegistry {
        &self.shared.registry
    }

    /// Validates and stages `spec`, then starts launching its instances.
    ///
    /// Validation and staging errors are returned here, before any instance
    /// is requested. Everything after that is reported through the returned
    /// controller.
    pub async fn prepare(
        &self,
        spec: ApplicationSpec,
    ) -> Result<ApplicationController> {
        spec.validate()?;

        let application_id = generate_id(&spec.name);
        info!(
            %application_id,
            runnables = spec.runnables().len(),
            instances = spec.total_instances(),
            "preparing application"
        );

        let staged = self
            .shared
            .distributor
            .stage_application(&application_id, &spec)
            .await?;

        let log_handlers = Arc::new(LogHandlers::new(self.log_handlers.clone()));
        let (status_tx, status_rx) = watch::channel(ApplicationStatus::pending(&application_id));
        let (commands_tx, commands_rx) = mpsc::channel(16);

        let supervisor = Supervisor::new(
            self.shared.clone(),
            application_id.clone(),
            spec,
            staged,
            log_handlers.clone(),
            status_tx,
            commands_rx,
        );
        spawn_task("application supervisor", supervisor.run());

        Ok(ApplicationController::new(
            application_id,
            self.shared.registry.clone(),
            status_rx,
            commands_tx,
            log_handlers,
            self.shared.config.controller.terminate_timeout(),
        ))
    }

    /// Stops the registry sweeper. Running applications keep their
    /// supervisors.
    pub fn shutdown(&self) {
        self.shared.registry.stop();
    }
}
