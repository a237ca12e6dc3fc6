//! Stats behaviour on the networked backend.

#[path = "../../keel-state/tests/common/mod.rs"]
mod common;

use std::sync::{Arc, Barrier};
use std::time::Duration;

use common::FakeRespServer;
use keel_core::{ControllerRef, ManualClock, StatsConfig};
use keel_state::{NetworkedBackend, SharedBackend};
use keel_stats::{ControllerCache, ControllerResolver, InterfaceStats, PodStats, StatsStore};

const START: u64 = 1_700_000_000;
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Every pod belongs to the `api` deployment.
struct SingleOwner;

impl ControllerResolver for SingleOwner {
    fn resolve(&self, namespace: &str, _pod_name: &str) -> Option<ControllerRef> {
        Some(ControllerRef::new("Deployment", namespace, "api"))
    }
}

fn connect(server: &FakeRespServer, max_data_points: usize) -> (StatsStore, Arc<ManualClock>) {
    let backend: SharedBackend = Arc::new(NetworkedBackend::connect(&server.config()).unwrap());
    let clock = Arc::new(ManualClock::new(START));
    let config = StatsConfig {
        max_data_points,
        ..Default::default()
    };
    let store = StatsStore::new(
        backend,
        Arc::new(ControllerCache::new(Arc::new(SingleOwner))),
        config,
        clock.clone(),
    );
    (store, clock)
}

fn pod(name: &str, cpu: i64) -> PodStats {
    PodStats {
        namespace: "shop".into(),
        pod_name: name.into(),
        cpu,
        ..Default::default()
    }
}

fn traffic(pod: &str, transmit: u64) -> InterfaceStats {
    InterfaceStats {
        namespace: "shop".into(),
        pod_name: pod.into(),
        transmit_bytes: transmit,
        ..Default::default()
    }
}

#[test]
fn append_keeps_newest_at_cap() {
    let server = FakeRespServer::start();
    let (store, _) = connect(&server, 3);
    for cpu in 1..=5 {
        store.append_pod_stats(pod("api-1", cpu));
    }

    let cpus: Vec<i64> = store
        .pod_stats_for_controller("shop", "api")
        .iter()
        .map(|s| s.cpu)
        .collect();
    assert_eq!(cpus, vec![3, 4, 5]);
}

#[test]
fn concurrent_appends_stay_at_cap() {
    let server = FakeRespServer::start();
    let (store, _) = connect(&server, 3);
    for cpu in 0..3 {
        store.append_pod_stats(pod("seed", cpu));
    }

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                store.append_pod_stats(pod(&format!("api-{t}"), 100 + t));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.pod_stats_for_controller("shop", "api").len(), 3);
}

#[test]
fn traffic_sum_matches_embedded() {
    let server = FakeRespServer::start();
    let (store, _) = connect(&server, 100);
    for transmit in [10, 15, 22] {
        store.append_interface_stats(traffic("api-1", transmit));
    }
    for transmit in [2, 7] {
        store.append_interface_stats(traffic("api-2", transmit));
    }

    let sum = store.sum_for_controller("shop", "api", false).unwrap();
    assert_eq!(sum.transmit_bytes, 29);
}

#[test]
fn stale_scope_is_evicted() {
    let server = FakeRespServer::start();
    let (store, clock) = connect(&server, 100);
    store.append_pod_stats(pod("api-1", 1));
    store.append_pod_stats(pod("api-1", 2));

    clock.set(START + 15 * DAY.as_secs());
    let report = store.evict().unwrap();
    assert_eq!(report.scopes_removed, 1);
    assert_eq!(report.entries_removed, 2);
    assert!(store.pod_stats_for_controller("shop", "api").is_empty());
}
