use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use super::*;
use crate::DiscoveryConfig;
use crate::DiscoveryError;
use crate::Error;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn registry() -> DiscoveryRegistry {
    DiscoveryRegistry::new(DiscoveryConfig::default())
}

#[tokio::test]
async fn test_register_is_write_once() {
    let registry = registry();
    registry.register("app", "i-1", "echo", addr(9000)).unwrap();

    let result = registry.register("app", "i-1", "echo", addr(9001));
    assert!(matches!(
        result,
        Err(Error::Discovery(DiscoveryError::AlreadyRegistered { .. }))
    ));
    assert_eq!(registry.snapshot("app", "echo")[0].address, addr(9000));

    // another service of the same instance is a separate entry
    registry.register("app", "i-1", "admin", addr(9002)).unwrap();
    assert_eq!(registry.registrations_of("i-1"), 2);
}

#[tokio::test]
async fn test_deregister_is_at_most_once() {
    let registry = registry();
    let mut events = registry.subscribe_events();
    let registration = registry.register("app", "i-1", "echo", addr(9000)).unwrap();

    assert!(registry.deregister(&registration));
    assert!(!registry.deregister(&registration));
    assert!(registry.is_empty());

    assert!(matches!(events.recv().await, Ok(MembershipEvent::Added(_))));
    assert!(matches!(
        events.recv().await,
        Ok(MembershipEvent::Removed {
            reason: RemovalReason::Deregistered,
            ..
        })
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_stale_registration_does_not_remove_new_entry() {
    let registry = registry();
    let old = registry.register("app", "i-1", "echo", addr(9000)).unwrap();
    assert!(registry.deregister(&old));
    tokio::time::sleep(Duration::from_millis(2)).await;

    let new = registry.register("app", "i-1", "echo", addr(9001)).unwrap();
    assert_ne!(old.entry().registered_at, new.entry().registered_at);

    assert!(!registry.deregister(&old));
    assert_eq!(registry.snapshot("app", "echo")[0].address, addr(9001));
}

#[tokio::test]
async fn test_snapshot_filters_by_application_and_service() {
    let registry = registry();
    registry.register("app-a", "i-2", "echo", addr(1)).unwrap();
    registry.register("app-a", "i-1", "echo", addr(2)).unwrap();
    registry.register("app-a", "i-3", "other", addr(3)).unwrap();
    registry.register("app-b", "i-4", "echo", addr(4)).unwrap();

    let ids: Vec<String> = registry
        .snapshot("app-a", "echo")
        .into_iter()
        .map(|e| e.instance_id)
        .collect();
    assert_eq!(ids, vec!["i-1".to_string(), "i-2".to_string()]);
}

#[tokio::test]
async fn test_deregister_instance_removes_all_entries_and_liveness() {
    let registry = registry();
    registry.register("app", "i-1", "echo", addr(1)).unwrap();
    registry.register("app", "i-1", "admin", addr(2)).unwrap();
    registry.register("app", "i-2", "echo", addr(3)).unwrap();

    assert_eq!(registry.deregister_instance("i-1"), 2);
    assert!(registry.last_heartbeat("i-1").is_none());
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.deregister_instance("i-1"), 0);
}

#[tokio::test]
async fn test_expire_stale_removes_entries_and_publishes_expiration() {
    let registry = registry();
    let mut expirations = registry.subscribe_expirations();
    let mut events = registry.subscribe_events();

    registry.register("app", "i-1", "echo", addr(1)).unwrap();
    registry.heartbeat("i-2");

    let later = Instant::now() + Duration::from_millis(3_001);
    let mut expired = registry.expire_stale(later);
    expired.sort();

    assert_eq!(expired, vec!["i-1".to_string(), "i-2".to_string()]);
    assert!(registry.is_empty());

    let mut seen = vec![expirations.recv().await.unwrap(), expirations.recv().await.unwrap()];
    seen.sort();
    assert_eq!(seen, expired);

    assert!(matches!(events.recv().await, Ok(MembershipEvent::Added(_))));
    assert!(matches!(
        events.recv().await,
        Ok(MembershipEvent::Removed {
            reason: RemovalReason::Expired,
            ..
        })
    ));
}

#[tokio::test]
async fn test_heartbeat_keeps_instance_alive() {
    let registry = registry();
    registry.register("app", "i-1", "echo", addr(1)).unwrap();

    let t0 = registry.last_heartbeat("i-1").unwrap();
    assert!(registry.expire_stale(t0 + Duration::from_millis(2_000)).is_empty());
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_expires_silent_instance_within_staleness_bound() {
    let config = DiscoveryConfig::default();
    let bound = config.staleness_bound();
    let registry = DiscoveryRegistry::new(config);
    registry.start();
    registry.start();
    assert!(registry.is_sweeping());

    let mut expirations = registry.subscribe_expirations();
    registry.register("app", "i-1", "echo", addr(1)).unwrap();

    let id = tokio::time::timeout(bound + Duration::from_millis(10), expirations.recv())
        .await
        .expect("expired within bound")
        .unwrap();
    assert_eq!(id, "i-1");
    assert!(registry.is_empty());

    registry.stop();
    registry.stop();
    assert!(!registry.is_sweeping());
}
