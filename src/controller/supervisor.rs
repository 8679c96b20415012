use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::launch_plan;
use super::ApplicationStatus;
use super::DriverShared;
use super::LaunchStage;
use crate::log_handler::LogHandlers;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::utils::generate_id;
use crate::ApplicationSpec;
use crate::ApplicationState;
use crate::Error;
use crate::ExitOutcome;
use crate::FailureKind;
use crate::InstanceEvent;
use crate::InstanceFailure;
use crate::InstanceHandle;
use crate::InstanceRecord;
use crate::InstanceReport;
use crate::InstanceReporter;
use crate::InstanceSignal;
use crate::InstanceState;
use crate::LaunchRequest;
use crate::Result;
use crate::RunnableSpec;
use crate::StagedApplication;
use crate::StagedBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlCommand {
    Terminate,
}

#[derive(Debug)]
enum LaunchOutcome {
    Accepted {
        instance_id: String,
        result: Result<InstanceHandle>,
    },
    RestartDue {
        runnable: String,
        replica: u32,
        attempt: u32,
    },
}

/// One replica position of a runnable; survives restarts
#[derive(Debug)]
struct Slot {
    restarts: u32,
    current: String,
    /// Set once any instance of this slot reported running
    reached_running: bool,
}

#[derive(Debug)]
struct Termination {
    started: Instant,
    killed: bool,
    forced: bool,
}

/// Owns every instance record of one application.
///
/// All state changes happen on this task, driven by controller commands,
/// instance reports, launch outcomes, registry expirations and a periodic
/// tick. Each change is published as an `ApplicationStatus`.
pub(crate) struct Supervisor {
    application_id: String,
    shared: DriverShared,
    runnables: HashMap<String, Arc<RunnableSpec>>,
    bundles: HashMap<String, Arc<Vec<StagedBundle>>>,
    application_args: Arc<Vec<String>>,
    log_handlers: Arc<LogHandlers>,

    instances: BTreeMap<String, InstanceRecord>,
    handles: HashMap<String, InstanceHandle>,
    slots: BTreeMap<(String, u32), Slot>,
    stages: VecDeque<LaunchStage>,
    current_stage: Option<LaunchStage>,
    failures: Vec<InstanceFailure>,
    pending_restarts: usize,
    termination: Option<Termination>,
    required_failed: bool,

    status_tx: watch::Sender<ApplicationStatus>,
    commands: mpsc::Receiver<ControlCommand>,
    reports_tx: mpsc::UnboundedSender<InstanceEvent>,
    reports: mpsc::UnboundedReceiver<InstanceEvent>,
    launches_tx: mpsc::UnboundedSender<LaunchOutcome>,
    launches: mpsc::UnboundedReceiver<LaunchOutcome>,
    expirations: broadcast::Receiver<String>,
}

impl Supervisor {
    pub(crate) fn new(
        shared: DriverShared,
        application_id: String,
        spec: ApplicationSpec,
        mut staged: StagedApplication,
        log_handlers: Arc<LogHandlers>,
        status_tx: watch::Sender<ApplicationStatus>,
        commands: mpsc::Receiver<ControlCommand>,
    ) -> Self {
        let stages = launch_plan(&spec.placement).into();
        let mut runnables = HashMap::new();
        let mut bundles = HashMap::new();
        for runnable in spec.runnables() {
            let staged_bundles = staged.remove(&runnable.name).unwrap_or_default();
            bundles.insert(runnable.name.clone(), Arc::new(staged_bundles));
            runnables.insert(runnable.name.clone(), Arc::new(runnable.clone()));
        }

        let (reports_tx, reports) = mpsc::unbounded_channel();
        let (launches_tx, launches) = mpsc::unbounded_channel();
        let expirations = shared.registry.subscribe_expirations();

        Self {
            application_id,
            runnables,
            bundles,
            application_args: Arc::new(spec.arguments),
            log_handlers,
            shared,
            instances: BTreeMap::new(),
            handles: HashMap::new(),
            slots: BTreeMap::new(),
            stages,
            current_stage: None,
            failures: Vec::new(),
            pending_restarts: 0,
            termination: None,
            required_failed: false,
            status_tx,
            commands,
            reports_tx,
            reports,
            launches_tx,
            launches,
            expirations,
        }
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.shared.config.discovery.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        info!(application_id = %self.application_id, "supervisor started");
        self.launch_next_stage();
        self.refresh();

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv(), if commands_open => match command {
                    Some(ControlCommand::Terminate) => self.begin_termination("terminate requested"),
                    None => {
                        debug!(application_id = %self.application_id, "all controllers dropped");
                        commands_open = false;
                    }
                },
                Some(event) = self.reports.recv() => self.on_report(event),
                Some(outcome) = self.launches.recv() => self.on_launch_outcome(outcome),
                expired = self.expirations.recv() => match expired {
                    Ok(instance_id) => self.on_expired(&instance_id),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "expiration events lagged, relying on tick");
                    }
                    Err(RecvError::Closed) => {}
                },
                _ = ticker.tick() => self.on_tick(),
            }

            if self.refresh() {
                break;
            }
        }

        self.finish().await;
        Ok(())
    }

    // -
    // Launching

    fn launch_next_stage(&mut self) {
        let Some(stage) = self.stages.pop_front() else {
            return;
        };
        info!(
            application_id = %self.application_id,
            runnables = ?stage.runnables,
            "launching stage"
        );

        for name in &stage.runnables {
            let Some(runnable) = self.runnables.get(name).cloned() else {
                continue;
            };
            for replica in 0..runnable.instances {
                self.launch(&runnable, replica, 0);
            }
        }
        self.current_stage = Some(stage);
    }

    fn launch(
        &mut self,
        runnable: &Arc<RunnableSpec>,
        replica: u32,
        attempt: u32,
    ) {
        let instance_id = generate_id(&format!("{}-{}", runnable.name, replica));
        self.instances.insert(
            instance_id.clone(),
            InstanceRecord::new(&self.application_id, &runnable.name, &instance_id, replica, attempt),
        );
        self.slots
            .entry((runnable.name.clone(), replica))
            .and_modify(|slot| slot.current = instance_id.clone())
            .or_insert(Slot {
                restarts: 0,
                current: instance_id.clone(),
                reached_running: false,
            });

        let request = LaunchRequest {
            application_id: self.application_id.clone(),
            instance_id: instance_id.clone(),
            replica,
            attempt,
            runnable: runnable.clone(),
            application_args: self.application_args.clone(),
            bundles: self.bundles.get(&runnable.name).cloned().unwrap_or_default(),
            reporter: InstanceReporter::new(&instance_id, self.reports_tx.clone()),
        };
        debug!(%instance_id, runnable = %runnable.name, replica, attempt, "requesting instance");

        let backend = self.shared.backend.clone();
        let policy = self.shared.config.retry.launch;
        let tx = self.launches_tx.clone();
        tokio::spawn(async move {
            let result = task_with_timeout_and_exponential_backoff(
                || {
                    let backend = backend.clone();
                    let request = request.clone();
                    async move { backend.request_instance(request).await }
                },
                policy,
            )
            .await;
            let _ = tx.send(LaunchOutcome::Accepted { instance_id, result });
        });
    }

    fn on_launch_outcome(
        &mut self,
        outcome: LaunchOutcome,
    ) {
        match outcome {
            LaunchOutcome::Accepted {
                instance_id,
                result: Ok(handle),
            } => {
                let Some(record) = self.instances.get_mut(&instance_id) else {
                    return;
                };
                if record.state == InstanceState::Pending {
                    let _ = record.transition(InstanceState::Starting);
                }
                if !record.state.is_live() {
                    return;
                }
                // accepted instances are on the liveness clock from here on
                if record.last_heartbeat.is_none() {
                    self.shared.registry.heartbeat(&instance_id);
                    record.last_heartbeat = self.shared.registry.last_heartbeat(&instance_id);
                }
                self.handles.insert(instance_id, handle.clone());
                if self.termination.is_some() {
                    self.send_signal(handle, InstanceSignal::Stop);
                }
            }
            LaunchOutcome::Accepted {
                instance_id,
                result: Err(e),
            } => {
                error!(%instance_id, "launch failed: {}", e);
                self.fail_instance(&instance_id, FailureKind::Launch, e.to_string());
            }
            LaunchOutcome::RestartDue {
                runnable,
                replica,
                attempt,
            } => {
                self.pending_restarts = self.pending_restarts.saturating_sub(1);
                if self.termination.is_some() {
                    debug!(%runnable, replica, "restart cancelled by termination");
                    return;
                }
                if let Some(spec) = self.runnables.get(&runnable).cloned() {
                    self.launch(&spec, replica, attempt);
                }
            }
        }
    }

    // -
    // Instance reports

    fn on_report(
        &mut self,
        event: InstanceEvent,
    ) {
        let InstanceEvent { instance_id, report } = event;
        let Some(record) = self.instances.get_mut(&instance_id) else {
            trace!(%instance_id, "report for unknown instance");
            return;
        };
        if record.state.is_terminal() {
            trace!(%instance_id, state = %record.state, "report for finished instance");
            return;
        }

        match report {
            InstanceReport::Running => {
                if let Err(e) = record.advance_to(InstanceState::Running) {
                    warn!(%instance_id, "unexpected running report: {}", e);
                }
                record.last_heartbeat = self.shared.registry.last_heartbeat(&instance_id);
                if let Some(slot) = self.slots.get_mut(&(record.runnable.clone(), record.replica)) {
                    if slot.current == instance_id {
                        slot.reached_running = true;
                    }
                }
            }
            InstanceReport::Announced { service, address } => {
                debug!(%instance_id, %service, %address, "instance announced service");
                record.address.get_or_insert(address);
            }
            InstanceReport::Log(entry) => self.log_handlers.dispatch(&entry),
            InstanceReport::ExitRequested => {
                if let Err(e) = record.advance_to(InstanceState::Stopping) {
                    warn!(%instance_id, "unexpected exit report: {}", e);
                }
            }
            InstanceReport::Exited {
                outcome: ExitOutcome::Completed,
            } => self.stop_instance(&instance_id, "entry point returned"),
            InstanceReport::Exited {
                outcome: ExitOutcome::Failed { kind, reason },
            } => {
                if kind == FailureKind::Killed && self.termination.is_some() {
                    self.stop_instance(&instance_id, "killed during termination");
                } else {
                    self.fail_instance(&instance_id, kind, reason);
                }
            }
        }
    }

    fn on_expired(
        &mut self,
        instance_id: &str,
    ) {
        let Some(record) = self.instances.get(instance_id) else {
            return;
        };
        if !record.state.is_live() {
            return;
        }
        let elapsed = record
            .last_heartbeat
            .map(|t| t.elapsed())
            .unwrap_or_else(|| self.shared.config.discovery.liveness_timeout());

        // reap whatever is left of it
        if let Some(handle) = self.handles.get(instance_id).cloned() {
            self.send_signal(handle, InstanceSignal::Kill);
        }

        if self.termination.is_some() {
            self.stop_instance(instance_id, "liveness expired during termination");
        } else {
            let reason = Error::LivenessTimeout {
                instance_id: instance_id.to_string(),
                elapsed,
            }
            .to_string();
            self.fail_instance(instance_id, FailureKind::LivenessTimeout, reason);
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        let timeout = self.shared.config.discovery.liveness_timeout();
        let registry = &self.shared.registry;
        let stale: Vec<String> = self
            .instances
            .iter_mut()
            .filter(|(_, r)| r.state.is_live() && r.state != InstanceState::Pending)
            .filter_map(|(id, r)| {
                r.last_heartbeat = registry.last_heartbeat(id);
                match r.last_heartbeat {
                    Some(seen) if now.saturating_duration_since(seen) > timeout => Some(id.clone()),
                    _ => None,
                }
            })
            .collect();
        for instance_id in stale {
            self.on_expired(&instance_id);
        }

        self.escalate_termination();
    }

    // -
    // State changes

    fn stop_instance(
        &mut self,
        instance_id: &str,
        why: &str,
    ) {
        let removed = self.shared.registry.deregister_instance(instance_id);
        if let Some(record) = self.instances.get_mut(instance_id) {
            if let Err(e) = record.advance_to(InstanceState::Stopped) {
                warn!(%instance_id, "cannot stop instance: {}", e);
                return;
            }
            info!(%instance_id, removed, why, "instance stopped");
        }
        self.handles.remove(instance_id);
    }

    fn fail_instance(
        &mut self,
        instance_id: &str,
        kind: FailureKind,
        reason: String,
    ) {
        self.shared.registry.deregister_instance(instance_id);
        self.handles.remove(instance_id);

        let Some(record) = self.instances.get_mut(instance_id) else {
            return;
        };
        if record.transition(InstanceState::Failed).is_err() {
            return;
        }
        record.last_error = Some(reason.clone());
        let (runnable, replica, attempt) = (record.runnable.clone(), record.replica, record.attempt);

        let Some(spec) = self.runnables.get(&runnable).cloned() else {
            return;
        };
        let max_always = self.shared.config.controller.max_restarts_for_always;
        let may_restart = self.termination.is_none() && !self.required_failed;
        let restart = match self.slots.get_mut(&(runnable.clone(), replica)) {
            Some(slot)
                if may_restart
                    && slot.current == instance_id
                    && spec.restart_policy.allows_restart(slot.restarts, max_always) =>
            {
                slot.restarts += 1;
                true
            }
            _ => false,
        };

        let failure = InstanceFailure {
            instance_id: instance_id.to_string(),
            runnable: runnable.clone(),
            replica,
            attempt,
            kind,
            reason,
            at: SystemTime::now(),
            terminal: !restart,
        };

        if restart {
            warn!(
                %instance_id,
                %runnable,
                replica,
                attempt,
                %kind,
                reason = %failure.reason,
                "instance failed, restarting"
            );
            self.schedule_restart(runnable.clone(), replica, attempt + 1);
        } else {
            error!(
                %instance_id,
                %runnable,
                replica,
                %kind,
                reason = %failure.reason,
                "instance failed terminally"
            );
        }

        if let Some(on_failure) = &self.shared.on_failure {
            on_failure(&failure);
        }
        self.failures.push(failure);

        if restart || self.termination.is_some() {
            return;
        }
        if spec.required {
            self.required_failed = true;
            self.begin_termination("required runnable failed");
        } else if self
            .current_stage
            .as_ref()
            .is_some_and(|stage| stage.runnables.contains(&runnable))
            && !self.stages.is_empty()
        {
            warn!(%runnable, remaining = self.stages.len(), "aborting remaining launch stages");
            self.stages.clear();
        }
    }

    fn schedule_restart(
        &mut self,
        runnable: String,
        replica: u32,
        attempt: u32,
    ) {
        self.pending_restarts += 1;
        let delay = self.shared.config.controller.restart_delay();
        let tx = self.launches_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LaunchOutcome::RestartDue {
                runnable,
                replica,
                attempt,
            });
        });
    }

    fn begin_termination(
        &mut self,
        why: &str,
    ) {
        if self.termination.is_some() {
            debug!(application_id = %self.application_id, "termination already in progress");
            return;
        }
        info!(application_id = %self.application_id, why, "terminating application");
        self.termination = Some(Termination {
            started: Instant::now(),
            killed: false,
            forced: false,
        });
        self.stages.clear();

        for handle in self.live_handles() {
            self.send_signal(handle, InstanceSignal::Stop);
        }
    }

    /// Stop → (grace) → Kill → (grace) → forced cleanup
    fn escalate_termination(&mut self) {
        let grace = self.shared.config.controller.stop_grace();
        let (kill, force) = match &mut self.termination {
            Some(t) => {
                let elapsed = t.started.elapsed();
                let kill = !t.killed && elapsed >= grace;
                let force = !t.forced && elapsed >= grace * 2;
                t.killed |= kill;
                t.forced |= force;
                (kill, force)
            }
            None => return,
        };

        if kill {
            let handles = self.live_handles();
            if !handles.is_empty() {
                warn!(count = handles.len(), "instances ignored stop, killing");
            }
            for handle in handles {
                self.send_signal(handle, InstanceSignal::Kill);
            }
        }

        if force {
            let stragglers: Vec<String> = self
                .instances
                .values()
                .filter(|r| r.state.is_live())
                .map(|r| r.instance_id.clone())
                .collect();
            for instance_id in stragglers {
                self.stop_instance(&instance_id, "forced cleanup");
            }
        }
    }

    fn live_handles(&self) -> Vec<InstanceHandle> {
        self.instances
            .values()
            .filter(|r| r.state.is_live())
            .filter_map(|r| self.handles.get(&r.instance_id).cloned())
            .collect()
    }

    fn send_signal(
        &self,
        handle: InstanceHandle,
        signal: InstanceSignal,
    ) {
        let backend = self.shared.backend.clone();
        let policy = self.shared.config.retry.signal;
        tokio::spawn(async move {
            let result = task_with_timeout_and_exponential_backoff(
                || {
                    let backend = backend.clone();
                    let handle = handle.clone();
                    async move { backend.signal(&handle, signal).await }
                },
                policy,
            )
            .await;
            if let Err(e) = result {
                warn!(instance_id = %handle.instance_id, ?signal, "signal failed: {}", e);
            }
        });
    }

    // -
    // Status

    fn current_stage_running(&self) -> bool {
        let Some(stage) = &self.current_stage else {
            return true;
        };
        self.slots
            .iter()
            .filter(|((runnable, _), _)| stage.runnables.contains(runnable))
            .all(|(_, slot)| slot.reached_running)
    }

    /// Running now, or ran and returned cleanly
    fn has_run(
        &self,
        slot: &Slot,
    ) -> bool {
        slot.reached_running
            && self.instances.get(&slot.current).is_some_and(|r| {
                matches!(r.state, InstanceState::Running | InstanceState::Stopped)
            })
    }

    /// Advances the launch plan and publishes the status. Returns true once
    /// the application is settled.
    fn refresh(&mut self) -> bool {
        if self.termination.is_none() && !self.stages.is_empty() && self.current_stage_running() {
            self.launch_next_stage();
        }

        let all_terminal = self.instances.values().all(|r| r.state.is_terminal());
        let settled = all_terminal
            && self.pending_restarts == 0
            && (self.termination.is_some() || self.stages.is_empty());

        let state = if self.required_failed {
            ApplicationState::Failed
        } else if settled {
            ApplicationState::Stopped
        } else if self.termination.is_some() {
            ApplicationState::Stopping
        } else if self.instances.values().any(|r| r.state == InstanceState::Running) {
            ApplicationState::Running
        } else if self.instances.is_empty() {
            ApplicationState::Pending
        } else {
            ApplicationState::Starting
        };

        let all_running = self.termination.is_none()
            && self.stages.is_empty()
            && !self.slots.is_empty()
            && self.slots.values().all(|slot| self.has_run(slot));

        let status = ApplicationStatus {
            application_id: self.application_id.clone(),
            state,
            instances: self.instances.values().cloned().collect(),
            failures: self.failures.clone(),
            all_running,
            settled,
        };
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });

        settled
    }

    async fn finish(&mut self) {
        for instance_id in self.instances.keys() {
            self.shared.registry.deregister_instance(instance_id);
        }
        self.shared.distributor.cleanup(&self.application_id).await;
        if let Err(e) = self.shared.backend.release(&self.application_id).await {
            warn!(application_id = %self.application_id, "backend release failed: {}", e);
        }

        let state = self.status_tx.borrow().state;
        info!(
            application_id = %self.application_id,
            %state,
            failures = self.failures.len(),
            "application settled"
        );
    }
}
