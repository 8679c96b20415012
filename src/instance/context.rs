use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::InstanceReport;
use super::InstanceReporter;
use crate::DiscoveryRegistry;
use crate::LogEntry;
use crate::LogLevel;
use crate::Registration;
use crate::Result;

/// An entry point. Runs inside an instance once its bundles are in place.
///
/// Returning ends the instance: `Ok` is a clean exit, `Err` (or a panic) a
/// failure the restart policy applies to. Long-running entry points should
/// return once `RunnableContext::shutdown_requested` resolves.
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    async fn run(
        &self,
        ctx: RunnableContext,
    ) -> Result<()>;
}

/// Identity of one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub application_id: String,
    pub runnable: String,
    pub instance_id: String,
    pub replica: u32,
    pub attempt: u32,
}

/// Everything an entry point gets from the engine
#[derive(Clone)]
pub struct RunnableContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    identity: InstanceIdentity,
    working_dir: PathBuf,
    application_arguments: Arc<Vec<String>>,
    arguments: Vec<String>,
    env: BTreeMap<String, String>,
    registry: DiscoveryRegistry,
    reporter: InstanceReporter,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RunnableContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RunnableContext")
            .field("identity", &self.inner.identity)
            .field("working_dir", &self.inner.working_dir)
            .finish_non_exhaustive()
    }
}

impl RunnableContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        identity: InstanceIdentity,
        working_dir: PathBuf,
        application_arguments: Arc<Vec<String>>,
        arguments: Vec<String>,
        env: BTreeMap<String, String>,
        registry: DiscoveryRegistry,
        reporter: InstanceReporter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                identity,
                working_dir,
                application_arguments,
                arguments,
                env,
                registry,
                reporter,
                shutdown,
            }),
        }
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.inner.identity
    }

    pub fn application_id(&self) -> &str {
        &self.inner.identity.application_id
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.identity.instance_id
    }

    pub fn runnable(&self) -> &str {
        &self.inner.identity.runnable
    }

    /// Directory holding the materialized bundles
    pub fn working_dir(&self) -> &Path {
        &self.inner.working_dir
    }

    /// Arguments shared by every runnable of the application
    pub fn application_arguments(&self) -> &[String] {
        &self.inner.application_arguments
    }

    /// Arguments of this runnable
    pub fn arguments(&self) -> &[String] {
        &self.inner.arguments
    }

    pub fn env(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.inner.env.get(key).map(String::as_str)
    }

    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.inner.env
    }

    /// Publishes `address` under `service` in the application's discovery
    /// namespace. Removed automatically when the entry point returns.
    pub fn announce(
        &self,
        service: &str,
        address: SocketAddr,
    ) -> Result<Registration> {
        let registration = self.inner.registry.register(
            &self.inner.identity.application_id,
            &self.inner.identity.instance_id,
            service,
            address,
        )?;
        self.inner.reporter.report(InstanceReport::Announced {
            service: service.to_string(),
            address,
        });
        Ok(registration)
    }

    /// Extra heartbeat on top of the runtime's periodic ones
    pub fn heartbeat(&self) {
        self.inner.registry.heartbeat(&self.inner.identity.instance_id);
    }

    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
    ) {
        let identity = &self.inner.identity;
        self.inner.reporter.report(InstanceReport::Log(LogEntry {
            application_id: identity.application_id.clone(),
            runnable: identity.runnable.clone(),
            instance_id: identity.instance_id.clone(),
            level,
            message: message.into(),
            timestamp: SystemTime::now(),
        }));
    }

    pub fn info(
        &self,
        message: impl Into<String>,
    ) {
        self.log(LogLevel::Info, message);
    }

    /// Resolves once the controller asked this instance to stop
    pub async fn shutdown_requested(&self) {
        self.inner.shutdown.cancelled().await
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}
