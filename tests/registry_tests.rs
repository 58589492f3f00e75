//! Integration tests for AddonRegistry
//!
//! These tests verify that the registry:
//! - Notifies every subscriber when a run publishes its addons
//! - Keeps earlier snapshots stable across publishes
//! - Can be read from many threads while a publish happens

use addon_indexer::{Addon, AddonIndexingHandle, AddonRegistry, RegistryChange};
use std::sync::Arc;
use std::thread;
use tokio::time::{Duration, timeout};

fn addons(names: &[&str]) -> Vec<Addon> {
    names
        .iter()
        .map(|name| Addon::from_handle(&AddonIndexingHandle::new(format!("mods/{}", name))))
        .collect()
}

#[tokio::test]
async fn test_publish_notifies_subscribers() {
    let registry = AddonRegistry::new();
    let mut rx1 = registry.subscribe();
    let mut rx2 = registry.subscribe();

    registry.publish(addons(&["@CBA_A3", "@ACE"]));

    for rx in [&mut rx1, &mut rx2] {
        let change = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("Timeout waiting for change")
            .expect("Channel closed");
        assert_eq!(change, RegistryChange::AddonsPublished { count: 2 });
    }
}

#[tokio::test]
async fn test_empty_publish_still_notifies() {
    let registry = AddonRegistry::new();
    let mut rx = registry.subscribe();

    registry.publish(Vec::new());

    let change = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for change")
        .expect("Channel closed");
    assert_eq!(change, RegistryChange::AddonsPublished { count: 0 });
    assert!(registry.snapshot().is_empty());
}

#[test]
fn test_snapshot_is_stable_across_publish() {
    let registry = AddonRegistry::new();
    registry.publish(addons(&["@First"]));
    let before = registry.snapshot();

    registry.publish(addons(&["@Second", "@Third"]));

    assert_eq!(before.len(), 1);
    assert_eq!(before[0].name(), "@First");
    assert_eq!(registry.snapshot().len(), 2);
    assert!(registry.find("@First").is_none());
    assert_eq!(
        registry.find("@Third").map(|a| a.name().to_string()),
        Some("@Third".to_string())
    );
}

#[test]
fn test_concurrent_readers_see_whole_lists() {
    let registry = Arc::new(AddonRegistry::new());
    registry.publish(addons(&["@A", "@B"]));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..200 {
                    let len = registry.snapshot().len();
                    assert!(len == 2 || len == 3, "partial list of {}", len);
                }
            })
        })
        .collect();

    registry.publish(addons(&["@A", "@B", "@C"]));

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(registry.snapshot().len(), 3);
}
