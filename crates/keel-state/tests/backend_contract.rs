//! Contract tests run against both backends.
//!
//! The networked backend is exercised against an in-process fake server,
//! see `common/mod.rs`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeRespServer;
use keel_state::keys::{self, SortOrder};
use keel_state::{
    Bucket, EmbeddedBackend, MigrationOutcome, MigrationRunner, NetworkedBackend, SharedBackend,
    StateError, StorageBackend, WriteBatch,
};

fn embedded() -> SharedBackend {
    Arc::new(EmbeddedBackend::open_in_memory().unwrap())
}

fn networked() -> (FakeRespServer, SharedBackend) {
    let server = FakeRespServer::start();
    let backend = NetworkedBackend::connect(&server.config()).unwrap();
    (server, Arc::new(backend))
}

/// Run `check` against a fresh backend of each kind.
fn for_each_backend(check: impl Fn(&SharedBackend)) {
    check(&embedded());
    let (_server, backend) = networked();
    check(&backend);
}

// ── Basic CRUD ─────────────────────────────────────────────────────

#[test]
fn put_get_delete() {
    for_each_backend(|backend| {
        backend.put(Bucket::CniConfig, "node-a", b"v1", None).unwrap();
        assert_eq!(
            backend.get(Bucket::CniConfig, "node-a").unwrap(),
            Some(b"v1".to_vec())
        );

        backend.put(Bucket::CniConfig, "node-a", b"v2", None).unwrap();
        assert_eq!(
            backend.get(Bucket::CniConfig, "node-a").unwrap(),
            Some(b"v2".to_vec())
        );

        assert!(backend.delete(Bucket::CniConfig, "node-a").unwrap());
        assert!(!backend.delete(Bucket::CniConfig, "node-a").unwrap());
        assert_eq!(backend.get(Bucket::CniConfig, "node-a").unwrap(), None);
    });
}

#[test]
fn buckets_are_isolated() {
    for_each_backend(|backend| {
        backend.put(Bucket::PodStats, "ns/a/1", b"pod", None).unwrap();
        backend.put(Bucket::TrafficStats, "ns/a/1", b"net", None).unwrap();

        assert_eq!(
            backend.get(Bucket::PodStats, "ns/a/1").unwrap(),
            Some(b"pod".to_vec())
        );
        let traffic = backend
            .list_by_prefix(Bucket::TrafficStats, "", SortOrder::None)
            .unwrap();
        assert_eq!(traffic, vec![("ns/a/1".to_string(), b"net".to_vec())]);
    });
}

// ── Ordering ───────────────────────────────────────────────────────

#[test]
fn listing_orders_identically() {
    for_each_backend(|backend| {
        // Inserted out of order and across two scopes.
        for (scope, seq) in [("ns/b", 2), ("ns/a", 10), ("ns/a", 1), ("ns/b", 7), ("ns/a", 3)] {
            let key = keys::series_key(scope, seq);
            backend
                .put(Bucket::PodStats, &key, seq.to_string().as_bytes(), None)
                .unwrap();
        }
        backend.put(Bucket::PodStats, "other/x/1", b"x", None).unwrap();

        let ascending: Vec<u64> = backend
            .keys_by_prefix(Bucket::PodStats, "ns/", SortOrder::Ascending)
            .unwrap()
            .iter()
            .filter_map(|k| keys::sequence_of(k))
            .collect();
        assert_eq!(ascending, vec![1, 2, 3, 7, 10]);

        let descending: Vec<String> = backend
            .list_by_prefix(Bucket::PodStats, "ns/a/", SortOrder::Descending)
            .unwrap()
            .into_iter()
            .map(|(_, v)| String::from_utf8(v).unwrap())
            .collect();
        assert_eq!(descending, vec!["10", "3", "1"]);

        let plain = backend
            .keys_by_prefix(Bucket::PodStats, "ns/", SortOrder::None)
            .unwrap();
        assert_eq!(plain.first().map(String::as_str), Some(keys::series_key("ns/a", 1).as_str()));
        assert_eq!(plain.len(), 5);
    });
}

#[test]
fn last_n_is_oldest_first_and_capped() {
    for_each_backend(|backend| {
        for seq in 1..=6 {
            backend
                .put(
                    Bucket::NodeStats,
                    &keys::series_key("node-a", seq),
                    seq.to_string().as_bytes(),
                    None,
                )
                .unwrap();
        }
        backend
            .put(Bucket::NodeStats, &keys::series_key("node-ab", 99), b"99", None)
            .unwrap();

        let values = backend.last_n(Bucket::NodeStats, "node-a", 3).unwrap();
        assert_eq!(values, vec![b"4".to_vec(), b"5".to_vec(), b"6".to_vec()]);

        let all = backend.last_n(Bucket::NodeStats, "node-a", 100).unwrap();
        assert_eq!(all.len(), 6);

        assert!(backend.last_n(Bucket::NodeStats, "missing", 3).unwrap().is_empty());
    });
}

// ── Sequences ──────────────────────────────────────────────────────

#[test]
fn sequences_are_independent_and_never_reused() {
    for_each_backend(|backend| {
        assert_eq!(backend.next_sequence("build-queue").unwrap(), 1);
        assert_eq!(backend.next_sequence("build-queue").unwrap(), 2);
        assert_eq!(backend.next_sequence("pod-stats/ns/a").unwrap(), 1);

        backend
            .put(Bucket::BuildQueue, &keys::queue_key(2), b"job", None)
            .unwrap();
        backend.delete(Bucket::BuildQueue, &keys::queue_key(2)).unwrap();
        assert_eq!(backend.next_sequence("build-queue").unwrap(), 3);
    });
}

#[test]
fn concurrent_sequences_are_unique() {
    for_each_backend(|backend| {
        let mut handles = Vec::new();
        for _ in 0..8 {
            let backend = backend.clone();
            handles.push(std::thread::spawn(move || {
                (0..10)
                    .map(|_| backend.next_sequence("shared").unwrap())
                    .collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=80).collect::<Vec<_>>());
    });
}

// ── Batches ────────────────────────────────────────────────────────

#[test]
fn batch_applies_puts_and_deletes_in_order() {
    for_each_backend(|backend| {
        backend.put(Bucket::PodStats, "ns/a/old", b"old", None).unwrap();

        let mut batch = WriteBatch::new();
        batch
            .put(Bucket::PodStats, "ns/a/new", b"new".to_vec(), None)
            .delete(Bucket::PodStats, "ns/a/old")
            .put(Bucket::SocketStats, "ns/a/pod", b"sock".to_vec(), None)
            .put(Bucket::SocketStats, "ns/a/pod", b"sock2".to_vec(), None);
        backend.apply(batch).unwrap();

        assert!(backend.get(Bucket::PodStats, "ns/a/old").unwrap().is_none());
        assert!(backend.get(Bucket::PodStats, "ns/a/new").unwrap().is_some());
        assert_eq!(
            backend.get(Bucket::SocketStats, "ns/a/pod").unwrap(),
            Some(b"sock2".to_vec())
        );
    });
}

// ── Migrations ─────────────────────────────────────────────────────

#[test]
fn migrations_run_once_on_both_backends() {
    for_each_backend(|backend| {
        let runner = MigrationRunner::new(backend.clone());
        let mut calls = 0;
        assert!(!runner.is_applied("m1").unwrap());
        runner
            .apply("m1", || {
                calls += 1;
                Ok(())
            })
            .unwrap();
        let second = runner.apply("m1", || anyhow::bail!("must not run")).unwrap();
        assert_eq!(second, MigrationOutcome::Skipped);
        assert_eq!(calls, 1);
        assert!(runner.is_applied("m1").unwrap());
    });
}

// ── Networked specifics ────────────────────────────────────────────

#[test]
fn networked_keys_are_prefixed_and_expire() {
    let (server, backend) = networked();
    backend
        .put(
            Bucket::BuildQueue,
            &keys::queue_key(1),
            b"job",
            Some(Duration::from_secs(60)),
        )
        .unwrap();
    backend.put(Bucket::CniConfig, "node-a", b"cni", None).unwrap();
    backend.next_sequence("build-queue").unwrap();

    let raw = server.raw_keys();
    assert!(raw.contains(&"keel:build-queue:queue-00000000000000000001".to_string()));
    assert!(raw.contains(&"keel:cni-config:node-a".to_string()));
    assert!(raw.contains(&"keel:seq:build-queue".to_string()));

    assert_eq!(
        server.ttl_ms("keel:build-queue:queue-00000000000000000001"),
        Some(60_000)
    );
    assert_eq!(server.ttl_ms("keel:cni-config:node-a"), None);
}

#[test]
fn networked_glob_characters_match_literally() {
    let (_server, backend) = networked();
    backend.put(Bucket::PodStats, "ns/a*/1", b"star", None).unwrap();
    backend.put(Bucket::PodStats, "ns/ab/1", b"plain", None).unwrap();

    let keys = backend
        .keys_by_prefix(Bucket::PodStats, "ns/a*/", SortOrder::None)
        .unwrap();
    assert_eq!(keys, vec!["ns/a*/1".to_string()]);
}

#[test]
fn networked_reconnects_after_disconnect() {
    let (server, backend) = networked();
    backend.put(Bucket::CniConfig, "node-a", b"v", None).unwrap();

    server.disconnect_all();

    assert_eq!(
        backend.get(Bucket::CniConfig, "node-a").unwrap(),
        Some(b"v".to_vec())
    );
}

#[test]
fn networked_authenticates() {
    let server = FakeRespServer::start_with_password(Some("hunter2"));
    let backend = NetworkedBackend::connect(&server.config()).unwrap();
    backend.put(Bucket::CniConfig, "n", b"v", None).unwrap();

    let mut wrong = server.config();
    wrong.password = Some("nope".to_string());
    let err = NetworkedBackend::connect(&wrong).unwrap_err();
    assert!(matches!(err, StateError::Connect(_)));
}

#[test]
fn networked_connect_failure_is_reported() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = keel_core::NetworkedConfig {
        port,
        connect_timeout_secs: 1,
        ..Default::default()
    };
    let err = NetworkedBackend::connect(&config).unwrap_err();
    assert!(matches!(err, StateError::Connect(_)));
}
