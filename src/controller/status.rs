use crate::ApplicationState;
use crate::InstanceFailure;
use crate::InstanceRecord;
use crate::InstanceState;

/// Point-in-time view of an application, published by its supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationStatus {
    pub application_id: String,
    pub state: ApplicationState,
    pub instances: Vec<InstanceRecord>,
    /// Every failure so far, including ones followed by a restart
    pub failures: Vec<InstanceFailure>,
    /// Every stage is launched and every replica is running
    pub all_running: bool,
    /// Every instance is terminal and nothing more will be launched
    pub settled: bool,
}

impl ApplicationStatus {
    pub(crate) fn pending(application_id: &str) -> Self {
        Self {
            application_id: application_id.to_string(),
            state: ApplicationState::Pending,
            instances: Vec::new(),
            failures: Vec::new(),
            all_running: false,
            settled: false,
        }
    }

    pub fn count_in(
        &self,
        state: InstanceState,
    ) -> usize {
        self.instances.iter().filter(|r| r.state == state).count()
    }

    /// Instances not yet stopped or failed
    pub fn live_instances(&self) -> usize {
        self.instances.iter().filter(|r| r.state.is_live()).count()
    }

    pub fn terminal_failures(&self) -> impl Iterator<Item = &InstanceFailure> {
        self.failures.iter().filter(|f| f.terminal)
    }

    pub fn instances_of<'a>(
        &'a self,
        runnable: &'a str,
    ) -> impl Iterator<Item = &'a InstanceRecord> + 'a {
        self.instances.iter().filter(move |r| r.runnable == runnable)
    }
}
