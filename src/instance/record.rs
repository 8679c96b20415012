use std::fmt;
use std::net::SocketAddr;
use std::time::SystemTime;

use tokio::time::Instant;
use tracing::debug;

use super::InstanceState;
use crate::InstanceError;
use crate::Result;

/// What the supervisor knows about one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub application_id: String,
    pub runnable: String,
    pub instance_id: String,
    pub replica: u32,
    /// 0 for the first launch of a replica, +1 per restart
    pub attempt: u32,
    pub state: InstanceState,
    /// First address the instance announced
    pub address: Option<SocketAddr>,
    pub last_heartbeat: Option<Instant>,
    pub last_error: Option<String>,
}

impl InstanceRecord {
    pub fn new(
        application_id: impl Into<String>,
        runnable: impl Into<String>,
        instance_id: impl Into<String>,
        replica: u32,
        attempt: u32,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            runnable: runnable.into(),
            instance_id: instance_id.into(),
            replica,
            attempt,
            state: InstanceState::Pending,
            address: None,
            last_heartbeat: None,
            last_error: None,
        }
    }

    /// Moves to `next`, rejecting moves the lifecycle does not allow
    pub fn transition(
        &mut self,
        next: InstanceState,
    ) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(InstanceError::InvalidTransition {
                instance_id: self.instance_id.clone(),
                from: self.state,
                to: next,
            }
            .into());
        }
        debug!(
            instance_id = %self.instance_id,
            from = %self.state,
            to = %next,
            "instance state change"
        );
        self.state = next;
        Ok(())
    }

    /// Walks the forward path `Pending → Starting → Running → Stopping →
    /// Stopped` up to `target`, taking shortcuts where they are legal.
    /// Used when reports arrive out of order.
    pub fn advance_to(
        &mut self,
        target: InstanceState,
    ) -> Result<()> {
        use InstanceState::*;
        while self.state != target {
            let next = if self.state.can_transition_to(target) {
                target
            } else {
                match self.state {
                    Pending => Starting,
                    Starting => Stopping,
                    Running => Stopping,
                    Stopping => Stopped,
                    Stopped | Failed => {
                        return Err(InstanceError::InvalidTransition {
                            instance_id: self.instance_id.clone(),
                            from: self.state,
                            to: target,
                        }
                        .into())
                    }
                }
            };
            self.transition(next)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Backend rejected or never accepted the launch request
    Launch,
    /// A bundle could not be laid out in the working directory
    Materialization,
    /// Entry point returned an error or panicked
    EntryPoint,
    /// Heartbeats stopped
    LivenessTimeout,
    /// Killed by the backend
    Killed,
}

impl fmt::Display for FailureKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            FailureKind::Launch => "launch",
            FailureKind::Materialization => "materialization",
            FailureKind::EntryPoint => "entry point",
            FailureKind::LivenessTimeout => "liveness timeout",
            FailureKind::Killed => "killed",
        };
        f.write_str(s)
    }
}

/// One instance failure as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFailure {
    pub instance_id: String,
    pub runnable: String,
    pub replica: u32,
    pub attempt: u32,
    pub kind: FailureKind,
    pub reason: String,
    pub at: SystemTime,
    /// No replacement will be launched for this failure
    pub terminal: bool,
}
