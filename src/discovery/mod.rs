//! Service discovery.
//!
//! The registry is an eventually-consistent set of
//! `(application_id, service_name, instance_id) -> address` entries. Entries
//! are written once on announce and removed at most once, by deregistration or
//! by liveness expiry.
//!
//! ```text
//! instance ── register/heartbeat ──► DiscoveryRegistry ── MembershipEvent ──► ServiceWatch
//!                                        │   (broadcast)                        (members view)
//!                                        └── sweeper: silent > liveness_timeout ⇒ Expired
//! ```
//!
//! A watch subscribes to the event stream before it reads its catch-up
//! snapshot, so it is at-least-once: duplicate `Added` events are absorbed by
//! keying the view on instance id, and a lagging watch reloads from a fresh
//! snapshot instead of silently missing a removal.

mod entry;
mod liveness;
mod registry;
mod watch;

pub use entry::*;
pub(crate) use liveness::*;
pub use registry::*;
pub use watch::*;

#[cfg(test)]
mod registry_test;
