use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::time::Duration;

use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use super::DiscoveryRegistry;
use super::MembershipEvent;
use super::RemovalReason;
use super::ServiceEntry;
use crate::DiscoveryError;
use crate::Result;

/// Push-updated view of one service.
///
/// `next_event` yields the initial members as `Added` events, then every
/// change. `members()` always reflects everything applied so far.
pub struct ServiceWatch {
    registry: DiscoveryRegistry,
    application_id: String,
    service_name: String,
    members: BTreeMap<String, ServiceEntry>,
    pending: VecDeque<MembershipEvent>,
    events: broadcast::Receiver<MembershipEvent>,
    closed: CancellationToken,
}

impl std::fmt::Debug for ServiceWatch {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ServiceWatch")
            .field("application_id", &self.application_id)
            .field("service_name", &self.service_name)
            .field("members", &self.members.len())
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl ServiceWatch {
    pub(super) fn new(
        registry: DiscoveryRegistry,
        application_id: String,
        service_name: String,
        members: BTreeMap<String, ServiceEntry>,
        pending: VecDeque<MembershipEvent>,
        events: broadcast::Receiver<MembershipEvent>,
    ) -> Self {
        Self {
            registry,
            application_id,
            service_name,
            members,
            pending,
            events,
            closed: CancellationToken::new(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Current members, ordered by instance id
    pub fn members(&self) -> Vec<ServiceEntry> {
        self.members.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(
        &self,
        instance_id: &str,
    ) -> bool {
        self.members.contains_key(instance_id)
    }

    /// Next membership change, or None once the watch is closed
    pub async fn next_event(&mut self) -> Option<MembershipEvent> {
        let closed = self.closed.clone();
        loop {
            if closed.is_cancelled() {
                return None;
            }
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            let received = tokio::select! {
                biased;
                _ = closed.cancelled() => return None,
                r = self.events.recv() => r,
            };

            match received {
                Ok(event) => {
                    if let Some(event) = self.apply(event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        service_name = %self.service_name,
                        skipped,
                        "watch lagged behind, reloading"
                    );
                    self.restart();
                }
                Err(RecvError::Closed) => {
                    self.closed.cancel();
                    return None;
                }
            }
        }
    }

    /// Waits until the view holds exactly `expected` members
    pub async fn wait_for_size(
        &mut self,
        expected: usize,
        timeout: Duration,
    ) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.members.len() == expected {
                return Ok(expected);
            }
            match timeout_at(deadline, self.next_event()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    return Err(DiscoveryError::WatchClosed(self.service_name.clone()).into())
                }
                Err(_) => {
                    return Err(DiscoveryError::WaitTimeout {
                        service_name: self.service_name.clone(),
                        expected,
                        actual: self.members.len(),
                    }
                    .into())
                }
            }
        }
    }

    /// Reloads the view from a fresh snapshot.
    ///
    /// Differences against the current view are queued behind any events not
    /// yet consumed, removals first, with `RemovalReason::Resync`.
    pub fn restart(&mut self) {
        self.events = self.registry.subscribe_events();
        let fresh: BTreeMap<String, ServiceEntry> = self
            .registry
            .snapshot(&self.application_id, &self.service_name)
            .into_iter()
            .map(|e| (e.instance_id.clone(), e))
            .collect();

        for (id, entry) in &self.members {
            if !fresh.contains_key(id) {
                self.pending.push_back(MembershipEvent::Removed {
                    entry: entry.clone(),
                    reason: RemovalReason::Resync,
                });
            }
        }
        for (id, entry) in &fresh {
            if !self.members.contains_key(id) {
                self.pending.push_back(MembershipEvent::Added(entry.clone()));
            }
        }

        debug!(
            service_name = %self.service_name,
            before = self.members.len(),
            after = fresh.len(),
            "watch reloaded"
        );
        self.members = fresh;
    }

    /// Stops this watch only. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Token that closes this watch from another task
    pub fn closer(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn into_stream(self) -> impl Stream<Item = MembershipEvent> {
        futures::stream::unfold(self, |mut watch| async move {
            watch.next_event().await.map(|event| (event, watch))
        })
    }

    /// Folds a registry event into the view. Returns it when it changed
    /// the view.
    pub(crate) fn apply(
        &mut self,
        event: MembershipEvent,
    ) -> Option<MembershipEvent> {
        if !event.entry().matches(&self.application_id, &self.service_name) {
            return None;
        }

        match &event {
            MembershipEvent::Added(entry) => {
                if self.members.contains_key(&entry.instance_id) {
                    return None;
                }
                self.members.insert(entry.instance_id.clone(), entry.clone());
            }
            MembershipEvent::Removed { entry, .. } => {
                self.members.remove(&entry.instance_id)?;
            }
        }
        Some(event)
    }
}
