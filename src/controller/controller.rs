use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::supervisor::ControlCommand;
use super::ApplicationStatus;
use crate::log_handler::LogHandlers;
use crate::ApplicationState;
use crate::ControllerError;
use crate::DiscoveryRegistry;
use crate::Error;
use crate::InstanceFailure;
use crate::LogHandler;
use crate::Result;
use crate::ServiceWatch;

/// Handle to one prepared application.
///
/// Cheap to clone. Every clone drives the same supervisor; `terminate` may be
/// called from several of them at once.
#[derive(Clone)]
pub struct ApplicationController {
    application_id: String,
    registry: DiscoveryRegistry,
    status: watch::Receiver<ApplicationStatus>,
    commands: mpsc::Sender<ControlCommand>,
    log_handlers: Arc<LogHandlers>,
    terminate_timeout: Duration,
}

impl std::fmt::Debug for ApplicationController {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ApplicationController")
            .field("application_id", &self.application_id)
            .field("state", &self.state())
            .field("log_handlers", &self.log_handlers.len())
            .finish()
    }
}

impl ApplicationController {
    pub(crate) fn new(
        application_id: String,
        registry: DiscoveryRegistry,
        status: watch::Receiver<ApplicationStatus>,
        commands: mpsc::Sender<ControlCommand>,
        log_handlers: Arc<LogHandlers>,
        terminate_timeout: Duration,
    ) -> Self {
        Self {
            application_id,
            registry,
            status,
            commands,
            log_handlers,
            terminate_timeout,
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn state(&self) -> ApplicationState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ApplicationStatus {
        self.status.borrow().clone()
    }

    /// Every failure after which no replacement was launched
    pub fn failed_instances(&self) -> Vec<InstanceFailure> {
        self.status.borrow().terminal_failures().cloned().collect()
    }

    /// Resolves once every stage is launched and every replica is running.
    /// A replica that already returned cleanly counts as running.
    ///
    /// Fails early when an instance failed terminally or the application
    /// settled.
    pub async fn await_running(
        &self,
        timeout: Duration,
    ) -> Result<()> {
        let mut status = self.status.clone();
        let waited = tokio::time::timeout(
            timeout,
            status.wait_for(|s| s.all_running || s.settled || s.terminal_failures().next().is_some()),
        )
        .await;

        match waited {
            Err(_) => Err(ControllerError::AwaitRunningTimeout {
                application_id: self.application_id.clone(),
                timeout,
            }
            .into()),
            Ok(Err(_)) => Err(self.closed_error()),
            Ok(Ok(current)) => {
                if current.all_running {
                    return Ok(());
                }
                let failed = current.terminal_failures().count();
                if failed > 0 {
                    return Err(ControllerError::ApplicationFailed {
                        application_id: self.application_id.clone(),
                        failed,
                    }
                    .into());
                }
                Err(ControllerError::Terminated(self.application_id.clone()).into())
            }
        }
    }

    /// Live view of `service_name` in this application's namespace
    pub fn discover_service(
        &self,
        service_name: &str,
    ) -> Result<ServiceWatch> {
        if self.status.borrow().settled {
            return Err(ControllerError::Terminated(self.application_id.clone()).into());
        }
        Ok(self.registry.watch(&self.application_id, service_name))
    }

    pub fn add_log_handler(
        &self,
        handler: Arc<dyn LogHandler>,
    ) {
        self.log_handlers.add(handler);
    }

    /// Stops every instance and waits until all of them left RUNNING and
    /// their registrations are gone.
    ///
    /// Idempotent. On timeout the cleanup keeps going in the background and
    /// `Error::TerminationTimeout` reports what is still live.
    pub async fn terminate(&self) -> Result<()> {
        if self.commands.send(ControlCommand::Terminate).await.is_err() {
            debug!(application_id = %self.application_id, "supervisor already gone");
        }

        let mut status = self.status.clone();
        let waited =
            tokio::time::timeout(self.terminate_timeout, status.wait_for(|s| s.settled)).await;

        match waited {
            Ok(Ok(_)) => {
                info!(application_id = %self.application_id, "application terminated");
                Ok(())
            }
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                let remaining = self.status.borrow().live_instances();
                warn!(
                    application_id = %self.application_id,
                    remaining,
                    "termination timed out"
                );
                Err(Error::TerminationTimeout {
                    application_id: self.application_id.clone(),
                    timeout: self.terminate_timeout,
                    remaining,
                })
            }
        }
    }

    /// Waits until the application settled, without asking it to stop
    pub async fn await_terminated(&self) -> Result<ApplicationState> {
        let mut status = self.status.clone();
        let settled = status.wait_for(|s| s.settled).await.map(|current| current.state);
        settled.map_err(|_| self.closed_error())
    }

    /// Supervisor dropped its status sender
    fn closed_error(&self) -> Error {
        if self.status.borrow().settled {
            ControllerError::Terminated(self.application_id.clone()).into()
        } else {
            ControllerError::SupervisorGone(self.application_id.clone()).into()
        }
    }
}
