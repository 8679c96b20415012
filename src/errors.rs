//! Orchestration Error Hierarchy
//!
//! Errors are grouped by the phase that raises them. Spec validation and
//! resource staging fail `prepare` synchronously, before any instance is
//! requested. Instance-local failures (materialization, entry point crashes,
//! liveness loss) never travel through the driver's call stack: they become
//! instance state transitions observable through the controller.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

use crate::InstanceState;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Application spec rejected before staging
    #[error(transparent)]
    SpecValidation(#[from] SpecValidationError),

    /// Bundle could not be captured at prepare time
    #[error(transparent)]
    ResourceStaging(#[from] ResourceStagingError),

    /// Bundle could not be laid out inside an instance working directory
    #[error(transparent)]
    ResourceMaterialization(#[from] ResourceMaterializationError),

    /// Cluster backend refused or failed a launch request
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// Instance stopped heartbeating and is presumed dead
    #[error("Instance {instance_id} missed heartbeats for {elapsed:?}")]
    LivenessTimeout { instance_id: String, elapsed: Duration },

    /// `terminate()` bound elapsed before every instance stopped
    #[error("Application {application_id} did not stop within {timeout:?} ({remaining} instances still running)")]
    TerminationTimeout {
        application_id: String,
        timeout: Duration,
        remaining: usize,
    },

    /// Service discovery failures
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Instance lifecycle violations
    #[error(transparent)]
    Instance(#[from] InstanceError),

    /// Controller handle misuse or lost supervisor
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Infrastructure-level failures (I/O, background tasks)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SpecValidationError {
    #[error("Application name cannot be empty")]
    EmptyApplicationName,

    /// Application names become directory names under the staging and work roots
    #[error("Invalid application name {0:?}")]
    InvalidApplicationName(String),

    #[error("Application {0} declares no runnables")]
    NoRunnables(String),

    #[error("Runnable name cannot be empty")]
    EmptyRunnableName,

    #[error("Invalid runnable name {0:?}")]
    InvalidRunnableName(String),

    #[error("Runnable {0} has an empty entry point")]
    EmptyEntryPoint(String),

    #[error("Duplicate runnable name: {0}")]
    DuplicateRunnable(String),

    #[error("Runnable {0} must request at least one instance")]
    ZeroInstances(String),

    #[error("Invalid bundle name {bundle:?} in runnable {runnable}")]
    InvalidBundleName { runnable: String, bundle: String },

    #[error("Duplicate bundle {bundle} in runnable {runnable}")]
    DuplicateBundle { runnable: String, bundle: String },

    #[error("Bundle {bundle} in runnable {runnable} has invalid destination {destination:?}")]
    InvalidDestination {
        runnable: String,
        bundle: String,
        destination: PathBuf,
    },

    #[error("Bundle {bundle} in runnable {runnable} points at directory {path} but is not an archive")]
    DirectoryWithoutArchive {
        runnable: String,
        bundle: String,
        path: PathBuf,
    },

    #[error("Bundle destination {destination:?} used twice in runnable {runnable}")]
    DuplicateDestination { runnable: String, destination: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceStagingError {
    /// Source path missing or unreadable
    #[error("Bundle {bundle} source {path} is unreadable: {source}")]
    SourceUnreadable {
        bundle: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Staging area write failures
    #[error("Staging I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory could not be packed into an archive
    #[error("Failed to archive bundle {bundle}: {source}")]
    Archive {
        bundle: String,
        #[source]
        source: std::io::Error,
    },

    /// Directory bundle staged without the archive flag
    #[error("Bundle {bundle} source {path} is a directory and must be staged as an archive")]
    NotArchivable { bundle: String, path: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceMaterializationError {
    /// Staged content does not match the digest captured at staging
    #[error("Bundle {bundle} digest mismatch (expected {expected}, actual {actual})")]
    DigestMismatch {
        bundle: String,
        expected: String,
        actual: String,
    },

    /// Something already occupies the destination
    #[error("Destination {0} already exists")]
    DestinationExists(PathBuf),

    /// Copy or rename failures
    #[error("Failed to materialize bundle {bundle} at {path}: {source}")]
    Io {
        bundle: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Archive extraction failures
    #[error("Failed to extract bundle {bundle}: {source}")]
    Extract {
        bundle: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Backend has no runnable registered under this entry point
    #[error("Unknown entry point: {0}")]
    UnknownEntryPoint(String),

    /// Backend rejected the request
    #[error("Launch of runnable {runnable} rejected: {reason}")]
    Rejected { runnable: String, reason: String },

    /// Backend unreachable or shut down
    #[error("Cluster backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Instance {instance_id} already registered service {service_name}")]
    AlreadyRegistered {
        service_name: String,
        instance_id: String,
    },

    #[error("Watch on service {0} is closed")]
    WatchClosed(String),

    #[error("Service {service_name} did not reach {expected} members in time (last seen {actual})")]
    WaitTimeout {
        service_name: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("Instance {instance_id} cannot move from {from} to {to}")]
    InvalidTransition {
        instance_id: String,
        from: InstanceState,
        to: InstanceState,
    },

    #[error("Unknown instance: {0}")]
    UnknownInstance(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Application reached a terminal state
    #[error("Application {0} has terminated")]
    Terminated(String),

    /// Supervisor task exited without settling the application
    #[error("Supervisor of application {0} is gone")]
    SupervisorGone(String),

    #[error("Application {application_id} not running after {timeout:?}")]
    AwaitRunningTimeout {
        application_id: String,
        timeout: Duration,
    },

    #[error("Application {application_id} failed: {failed} instance(s) failed terminally")]
    ApplicationFailed { application_id: String, failed: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error("{0}")]
    SignalSendFailed(String),

    #[error("{0}")]
    RetryTaskFailed(String),

    #[error("Retry timeout")]
    RetryTimeout,
}

impl Error {
    /// Transient failures worth another attempt. Rejections and validation
    /// errors come back the same every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Launch(LaunchError::BackendUnavailable(_)) => true,
            Error::System(SystemError::Io(_) | SystemError::RetryTimeout) => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(SystemError::Io(e))
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(e))
    }
}
