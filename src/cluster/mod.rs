//! Cluster backend abstraction.
//!
//! The driver asks a `ClusterBackend` for one container per instance and
//! signals it on termination. Exit notifications are best effort and travel
//! back on the request's `InstanceReporter`.

mod local;

pub use local::*;


use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::InstanceReporter;
use crate::Result;
use crate::RunnableSpec;
use crate::StagedBundle;

/// Everything a backend needs to start one instance
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub application_id: String,
    pub instance_id: String,
    pub replica: u32,
    pub attempt: u32,
    pub runnable: Arc<RunnableSpec>,
    pub application_args: Arc<Vec<String>>,
    pub bundles: Arc<Vec<StagedBundle>>,
    pub reporter: InstanceReporter,
}

/// Backend-side handle of a launched instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    pub instance_id: String,
    /// Opaque backend reference (container id, task path, ...)
    pub backend_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceSignal {
    /// Ask the instance to stop gracefully
    Stop,
    /// Stop it now
    Kill,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterBackend: Send + Sync + 'static {
    /// Requests a container for one instance. Returns once the backend
    /// accepted the request; the instance reports its own progress.
    ///
    /// Requests are idempotent per `instance_id`: repeating one for an
    /// instance the backend already runs returns the existing handle.
    async fn request_instance(
        &self,
        request: LaunchRequest,
    ) -> Result<InstanceHandle>;

    /// Delivers `signal`. Signalling an instance that already exited is not
    /// an error.
    async fn signal(
        &self,
        handle: &InstanceHandle,
        signal: InstanceSignal,
    ) -> Result<()>;

    /// Frees whatever the backend still holds for a settled application
    async fn release(
        &self,
        application_id: &str,
    ) -> Result<()>;
}
