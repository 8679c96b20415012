use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Weak;
use std::time::SystemTime;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::EntryKey;
use super::LivenessTracker;
use super::MembershipEvent;
use super::Registration;
use super::RemovalReason;
use super::ServiceEntry;
use super::ServiceWatch;
use crate::DiscoveryConfig;
use crate::DiscoveryError;
use crate::Result;

/// Shared registry of announced services.
///
/// Cheap to clone; clones share the same entries, event stream and sweeper.
#[derive(Clone, Debug)]
pub struct DiscoveryRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    entries: DashMap<EntryKey, ServiceEntry>,
    liveness: LivenessTracker,
    events: broadcast::Sender<MembershipEvent>,
    expirations: broadcast::Sender<String>,
    /// Cancels the sweeper task (None when not running)
    sweeper: Mutex<Option<CancellationToken>>,
    config: DiscoveryConfig,
}

impl std::fmt::Debug for RegistryInner {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RegistryInner")
            .field("entries", &self.entries.len())
            .field("tracked_instances", &self.liveness.len())
            .field("sweeping", &self.sweeper.lock().is_some())
            .finish()
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        if let Some(token) = self.sweeper.get_mut().take() {
            token.cancel();
        }
    }
}

impl DiscoveryRegistry {
    pub fn new(config: DiscoveryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer_size);
        let (expirations, _) = broadcast::channel(config.event_buffer_size);
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                liveness: LivenessTracker::new(),
                events,
                expirations,
                sweeper: Mutex::new(None),
                config,
            }),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    /// Announces `address` for `service_name` on behalf of `instance_id`.
    ///
    /// Write-once: announcing the same service twice from one instance fails.
    /// Counts as a heartbeat.
    pub fn register(
        &self,
        application_id: &str,
        instance_id: &str,
        service_name: &str,
        address: SocketAddr,
    ) -> Result<Registration> {
        let entry = ServiceEntry {
            application_id: application_id.to_string(),
            service_name: service_name.to_string(),
            instance_id: instance_id.to_string(),
            address,
            registered_at: SystemTime::now(),
        };

        match self.inner.entries.entry(entry.key()) {
            Entry::Occupied(_) => {
                return Err(DiscoveryError::AlreadyRegistered {
                    service_name: service_name.to_string(),
                    instance_id: instance_id.to_string(),
                }
                .into());
            }
            Entry::Vacant(vacant) => {
                let _guard = vacant.insert(entry.clone());
                // published under the shard lock so a racing removal is
                // always observed after this addition
                let _ = self.inner.events.send(MembershipEvent::Added(entry.clone()));
            }
        }

        self.inner.liveness.touch(instance_id, Instant::now());
        info!(application_id, instance_id, service_name, %address, "service registered");
        Ok(Registration::new(entry))
    }

    /// Removes the entry behind `registration`. Returns false when it is
    /// already gone.
    pub fn deregister(
        &self,
        registration: &Registration,
    ) -> bool {
        let entry = registration.entry();
        let removed = self
            .inner
            .entries
            .remove_if(&entry.key(), |_, current| current.registered_at == entry.registered_at);

        match removed {
            Some((_, entry)) => {
                self.publish_removal(entry, RemovalReason::Deregistered);
                true
            }
            None => false,
        }
    }

    /// Removes every entry owned by `instance_id` and stops tracking its
    /// liveness. Returns the number of entries removed.
    pub fn deregister_instance(
        &self,
        instance_id: &str,
    ) -> usize {
        self.inner.liveness.forget(instance_id);
        self.remove_instance_entries(instance_id, RemovalReason::Deregistered)
    }

    pub fn heartbeat(
        &self,
        instance_id: &str,
    ) {
        trace!(instance_id, "heartbeat");
        self.inner.liveness.touch(instance_id, Instant::now());
    }

    pub fn last_heartbeat(
        &self,
        instance_id: &str,
    ) -> Option<Instant> {
        self.inner.liveness.last_seen(instance_id)
    }

    /// Current members of a service, ordered by instance id
    pub fn snapshot(
        &self,
        application_id: &str,
        service_name: &str,
    ) -> Vec<ServiceEntry> {
        let mut members: Vec<ServiceEntry> = self
            .inner
            .entries
            .iter()
            .filter(|r| r.value().matches(application_id, service_name))
            .map(|r| r.value().clone())
            .collect();
        members.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        members
    }

    /// Number of entries `instance_id` still owns
    pub fn registrations_of(
        &self,
        instance_id: &str,
    ) -> usize {
        self.inner
            .entries
            .iter()
            .filter(|r| r.key().instance_id == instance_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Live view of one service of one application
    pub fn watch(
        &self,
        application_id: &str,
        service_name: &str,
    ) -> ServiceWatch {
        // subscribe first: anything registered after the snapshot is on the stream
        let events = self.inner.events.subscribe();
        let members: BTreeMap<String, ServiceEntry> = self
            .snapshot(application_id, service_name)
            .into_iter()
            .map(|e| (e.instance_id.clone(), e))
            .collect();
        let pending: VecDeque<MembershipEvent> =
            members.values().cloned().map(MembershipEvent::Added).collect();

        debug!(
            application_id,
            service_name,
            initial = members.len(),
            "watch opened"
        );
        ServiceWatch::new(
            self.clone(),
            application_id.to_string(),
            service_name.to_string(),
            members,
            pending,
            events,
        )
    }

    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<MembershipEvent> {
        self.inner.events.subscribe()
    }

    /// Ids of instances whose liveness expired
    pub fn subscribe_expirations(&self) -> broadcast::Receiver<String> {
        self.inner.expirations.subscribe()
    }

    /// Expires every instance silent for longer than the liveness timeout
    pub(crate) fn expire_stale(
        &self,
        now: Instant,
    ) -> Vec<String> {
        let expired = self
            .inner
            .liveness
            .take_expired(now, self.inner.config.liveness_timeout());

        for instance_id in &expired {
            let removed = self.remove_instance_entries(instance_id, RemovalReason::Expired);
            warn!(instance_id = %instance_id, removed, "instance liveness expired");
            let _ = self.inner.expirations.send(instance_id.clone());
        }
        expired
    }

    /// Starts the expiry sweeper. Idempotent.
    pub fn start(&self) {
        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(sweep_loop(
            weak,
            token.clone(),
            self.inner.config.sweep_interval(),
        ));
        *sweeper = Some(token);
        debug!(
            interval_ms = self.inner.config.sweep_interval_ms,
            "liveness sweeper started"
        );
    }

    /// Stops the expiry sweeper. Idempotent.
    pub fn stop(&self) {
        if let Some(token) = self.inner.sweeper.lock().take() {
            token.cancel();
            debug!("liveness sweeper stopped");
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.inner.sweeper.lock().is_some()
    }

    fn remove_instance_entries(
        &self,
        instance_id: &str,
        reason: RemovalReason,
    ) -> usize {
        let keys: Vec<EntryKey> = self
            .inner
            .entries
            .iter()
            .filter(|r| r.key().instance_id == instance_id)
            .map(|r| r.key().clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.inner.entries.remove(&key) {
                self.publish_removal(entry, reason);
                removed += 1;
            }
        }
        removed
    }

    fn publish_removal(
        &self,
        entry: ServiceEntry,
        reason: RemovalReason,
    ) {
        info!(
            application_id = %entry.application_id,
            instance_id = %entry.instance_id,
            service_name = %entry.service_name,
            ?reason,
            "service removed"
        );
        let _ = self.inner.events.send(MembershipEvent::Removed { entry, reason });
    }
}

async fn sweep_loop(
    registry: Weak<RegistryInner>,
    token: CancellationToken,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = registry.upgrade() else {
                    break;
                };
                DiscoveryRegistry { inner }.expire_stale(Instant::now());
            }
        }
    }
    trace!("sweeper exited");
}
