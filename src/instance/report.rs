use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::trace;

use super::FailureKind;
use crate::LogEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Completed,
    Failed { kind: FailureKind, reason: String },
}

/// Progress an instance sends to its application supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceReport {
    /// Bundles are in place, the entry point is starting
    Running,
    Announced {
        service: String,
        address: SocketAddr,
    },
    Log(LogEntry),
    /// The entry point returned, deregistration follows
    ExitRequested,
    /// Best effort; may never arrive for an instance that died silently
    Exited { outcome: ExitOutcome },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEvent {
    pub instance_id: String,
    pub report: InstanceReport,
}

/// Sending half of an instance's report channel
#[derive(Debug, Clone)]
pub struct InstanceReporter {
    instance_id: String,
    tx: mpsc::UnboundedSender<InstanceEvent>,
}

impl InstanceReporter {
    pub fn new(
        instance_id: impl Into<String>,
        tx: mpsc::UnboundedSender<InstanceEvent>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            tx,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Returns false once the supervisor is gone
    pub fn report(
        &self,
        report: InstanceReport,
    ) -> bool {
        let sent = self
            .tx
            .send(InstanceEvent {
                instance_id: self.instance_id.clone(),
                report,
            })
            .is_ok();
        if !sent {
            trace!(instance_id = %self.instance_id, "supervisor gone, report dropped");
        }
        sent
    }

    pub fn running(&self) -> bool {
        self.report(InstanceReport::Running)
    }

    pub fn exit_requested(&self) -> bool {
        self.report(InstanceReport::ExitRequested)
    }

    pub fn exited(
        &self,
        outcome: ExitOutcome,
    ) -> bool {
        self.report(InstanceReport::Exited { outcome })
    }

    pub fn failed(
        &self,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> bool {
        self.exited(ExitOutcome::Failed {
            kind,
            reason: reason.into(),
        })
    }
}
