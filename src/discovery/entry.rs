use std::net::SocketAddr;
use std::time::SystemTime;

/// Registry key. One entry per instance per service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub application_id: String,
    pub service_name: String,
    pub instance_id: String,
}

/// An announced endpoint. Never mutated once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub application_id: String,
    pub service_name: String,
    pub instance_id: String,
    pub address: SocketAddr,
    pub registered_at: SystemTime,
}

impl ServiceEntry {
    pub fn key(&self) -> EntryKey {
        EntryKey {
            application_id: self.application_id.clone(),
            service_name: self.service_name.clone(),
            instance_id: self.instance_id.clone(),
        }
    }

    pub(crate) fn matches(
        &self,
        application_id: &str,
        service_name: &str,
    ) -> bool {
        self.application_id == application_id && self.service_name == service_name
    }
}

/// Proof of a successful `register`, consumed by `deregister`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    entry: ServiceEntry,
}

impl Registration {
    pub(crate) fn new(entry: ServiceEntry) -> Self {
        Self { entry }
    }

    pub fn entry(&self) -> &ServiceEntry {
        &self.entry
    }

    pub fn address(&self) -> SocketAddr {
        self.entry.address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Instance or controller removed the entry
    Deregistered,
    /// Instance stopped heartbeating
    Expired,
    /// Entry vanished while a lagging watch was reloading
    Resync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Added(ServiceEntry),
    Removed {
        entry: ServiceEntry,
        reason: RemovalReason,
    },
}

impl MembershipEvent {
    pub fn entry(&self) -> &ServiceEntry {
        match self {
            MembershipEvent::Added(entry) | MembershipEvent::Removed { entry, .. } => entry,
        }
    }
}
