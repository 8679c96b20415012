use std::fmt;

/// Lifecycle of one runnable instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// Launch requested, not yet accepted by the backend
    Pending,
    /// Accepted; bundles being materialized
    Starting,
    Running,
    /// Stop requested or entry point returned; cleanup in progress
    Stopping,
    Stopped,
    Failed,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Failed)
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(
        &self,
        next: InstanceState,
    ) -> bool {
        use InstanceState::*;
        match (self, next) {
            (Pending, Starting) | (Starting, Running) | (Running, Stopping) | (Stopping, Stopped) => {
                true
            }
            // terminated before the backend accepted the launch
            (Pending, Stopped) => true,
            // stopped while still materializing
            (Starting, Stopping) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            InstanceState::Pending => "PENDING",
            InstanceState::Starting => "STARTING",
            InstanceState::Running => "RUNNING",
            InstanceState::Stopping => "STOPPING",
            InstanceState::Stopped => "STOPPED",
            InstanceState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Aggregate state of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationState {
    /// Nothing launched yet
    Pending,
    /// Launches outstanding, nothing running
    Starting,
    /// At least one instance running
    Running,
    /// Termination in progress
    Stopping,
    Stopped,
    /// A required runnable failed terminally
    Failed,
}

impl ApplicationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApplicationState::Stopped | ApplicationState::Failed)
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            ApplicationState::Pending => "PENDING",
            ApplicationState::Starting => "STARTING",
            ApplicationState::Running => "RUNNING",
            ApplicationState::Stopping => "STOPPING",
            ApplicationState::Stopped => "STOPPED",
            ApplicationState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}
