//! StatsStore — bounded per-scope time series.
//!
//! Pod and interface samples are scoped by `{namespace}/{controller}`, node
//! samples by `{node}`. Each scope holds at most `max_data_points` entries;
//! appending past the cap drops the lowest sequences in the same batch as
//! the insert. Appends to one scope are serialized so concurrent collectors
//! cannot both trim the same oldest entry.
//!
//! Appends never surface errors to collectors. Reads are best-effort and
//! return empty values on failure. Eviction and CNI replacement return
//! their errors.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use keel_core::{Clock, ControllerRef, RETENTION, SOCKET_CONNECTION_MIN_COUNT, StatsConfig};
use keel_state::keys::{self, SortOrder};
use keel_state::{Bucket, SharedBackend, WriteBatch, codec};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::aggregate::{MinuteBuckets, clamp_window, to_deltas};
use crate::error::{StatsError, StatsResult};
use crate::owner_cache::ControllerCache;
use crate::types::{
    ChartEntry, ChartMetric, CniData, InterfaceStats, NodeStats, PodStats, SocketConnections,
};

/// Number of locks series counters are spread over.
const APPEND_LOCK_STRIPES: usize = 32;

/// Outcome of one eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    /// Series scopes whose newest sample fell out of the retention window.
    pub scopes_removed: usize,
    /// Samples deleted with those scopes.
    pub entries_removed: usize,
    /// Socket connection snapshots not updated within the retention window.
    pub sockets_removed: usize,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        self.scopes_removed == 0 && self.sockets_removed == 0
    }
}

#[derive(Clone)]
pub struct StatsStore {
    backend: SharedBackend,
    controllers: Arc<ControllerCache>,
    config: StatsConfig,
    clock: Arc<dyn Clock>,
    /// Held across sequence allocation, listing and trimming of a scope.
    append_locks: Arc<[Mutex<()>; APPEND_LOCK_STRIPES]>,
}

impl StatsStore {
    pub fn new(
        backend: SharedBackend,
        controllers: Arc<ControllerCache>,
        config: StatsConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            controllers,
            config,
            clock,
            append_locks: Arc::new(std::array::from_fn(|_| Mutex::new(()))),
        }
    }

    pub fn controllers(&self) -> &ControllerCache {
        &self.controllers
    }

    // ── Appends ────────────────────────────────────────────────────

    pub fn append_pod_stats(&self, mut entry: PodStats) {
        let controller = self
            .controllers
            .controller_for(&entry.namespace, &entry.pod_name);
        entry.created_at = self.clock.now_secs();

        let scope = controller_scope(&entry.namespace, &controller.name);
        if let Err(e) = self.bounded_append(Bucket::PodStats, &scope, &entry, WriteBatch::new()) {
            warn!(
                namespace = %entry.namespace,
                pod = %entry.pod_name,
                error = %e,
                "dropping pod stats sample"
            );
        }
    }

    /// Append an interface sample. Its socket connections are stored
    /// separately per pod, keeping only those seen more than
    /// [`SOCKET_CONNECTION_MIN_COUNT`] times.
    pub fn append_interface_stats(&self, mut entry: InterfaceStats) {
        let controller = self
            .controllers
            .controller_for(&entry.namespace, &entry.pod_name);
        let now = self.clock.now_secs();
        entry.created_at = now;

        let mut batch = WriteBatch::new();
        if let Some(connections) = entry.socket_connections.take() {
            let snapshot = SocketConnections {
                last_update: now,
                connections: connections
                    .into_iter()
                    .filter(|(_, count)| *count > SOCKET_CONNECTION_MIN_COUNT)
                    .collect(),
            };
            match encode(&snapshot) {
                Ok(bytes) => {
                    let key = socket_key(&entry.namespace, &controller.name, &entry.pod_name);
                    batch.put(Bucket::SocketStats, key, bytes, None);
                }
                Err(e) => warn!(pod = %entry.pod_name, error = %e, "dropping socket connections"),
            }
        }

        let scope = controller_scope(&entry.namespace, &controller.name);
        if let Err(e) = self.bounded_append(Bucket::TrafficStats, &scope, &entry, batch) {
            warn!(
                namespace = %entry.namespace,
                pod = %entry.pod_name,
                error = %e,
                "dropping interface stats sample"
            );
        }
    }

    pub fn append_node_stats(&self, mut entry: NodeStats) {
        entry.created_at = self.clock.now_secs();
        if let Err(e) = self.bounded_append(Bucket::NodeStats, &entry.name, &entry, WriteBatch::new())
        {
            warn!(node = %entry.name, error = %e, "dropping node stats sample");
        }
    }

    /// Insert `entry` as the newest sample of `scope`, applied together with
    /// `batch` and the deletes that keep the scope at its cap.
    fn bounded_append<T: Serialize>(
        &self,
        bucket: Bucket,
        scope: &str,
        entry: &T,
        mut batch: WriteBatch,
    ) -> StatsResult<u64> {
        let value = encode(entry)?;
        let counter = format!("{bucket}/{scope}");
        let _guard = self.append_lock(&counter);

        let seq = self.backend.next_sequence(&counter)?;
        let existing =
            self.backend
                .keys_by_prefix(bucket, &keys::series_prefix(scope), SortOrder::Ascending)?;

        let cap = self.config.max_data_points.max(1);
        let excess = (existing.len() + 1).saturating_sub(cap);

        let key = keys::series_key(scope, seq);
        batch.put(bucket, key.as_str(), value, None);
        for old in existing.into_iter().take(excess) {
            batch.delete(bucket, old);
        }
        self.backend.apply(batch)?;

        debug!(%bucket, %key, evicted = excess, "stats sample stored");
        Ok(seq)
    }

    fn append_lock(&self, counter: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        counter.hash(&mut hasher);
        let stripe = (hasher.finish() % APPEND_LOCK_STRIPES as u64) as usize;
        self.append_locks[stripe]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Pod stats ──────────────────────────────────────────────────

    /// Samples of one controller, oldest first.
    pub fn pod_stats_for_controller(&self, namespace: &str, controller: &str) -> Vec<PodStats> {
        let scope = controller_scope(namespace, controller);
        self.read(Bucket::PodStats, &keys::series_prefix(&scope), SortOrder::Ascending)
    }

    pub fn last_pod_stats_for_controller(
        &self,
        namespace: &str,
        controller: &str,
    ) -> Option<PodStats> {
        self.newest(Bucket::PodStats, &controller_scope(namespace, controller))
    }

    pub fn pod_stats_for_namespace(&self, namespace: &str) -> Vec<PodStats> {
        self.read(Bucket::PodStats, &keys::series_prefix(namespace), SortOrder::Ascending)
    }

    /// The newest sample of each pod in `namespace`, ordered by pod name.
    pub fn last_pod_stats_for_namespace(&self, namespace: &str) -> Vec<PodStats> {
        let mut newest: BTreeMap<String, PodStats> = BTreeMap::new();
        for entry in self.pod_stats_for_namespace(namespace) {
            match newest.get(&entry.pod_name) {
                Some(known) if known.created_at > entry.created_at => {}
                _ => {
                    newest.insert(entry.pod_name.clone(), entry);
                }
            }
        }
        newest.into_values().collect()
    }

    // ── Traffic ────────────────────────────────────────────────────

    /// Samples of one controller, oldest first.
    pub fn traffic_for_controller(&self, namespace: &str, controller: &str) -> Vec<InterfaceStats> {
        let scope = controller_scope(namespace, controller);
        self.read(Bucket::TrafficStats, &keys::series_prefix(&scope), SortOrder::Ascending)
    }

    pub fn traffic_for_namespace(&self, namespace: &str) -> Vec<InterfaceStats> {
        self.read(Bucket::TrafficStats, &keys::series_prefix(namespace), SortOrder::Ascending)
    }

    /// Total traffic of a controller across all of its pods and counter
    /// epochs.
    ///
    /// Samples are walked newest first. Consecutive samples of one pod form
    /// a run: the newest sample supplies the run's counters and an older
    /// one only adds to them when it starts a different counter epoch (see
    /// [`InterfaceStats::is_new_epoch`]). Runs are summed. The result
    /// carries the identity fields of the newest sample.
    pub fn sum_for_controller(
        &self,
        namespace: &str,
        controller: &str,
        include_socket_connections: bool,
    ) -> Option<InterfaceStats> {
        let scope = controller_scope(namespace, controller);
        let samples: Vec<InterfaceStats> = self.read(
            Bucket::TrafficStats,
            &keys::series_prefix(&scope),
            SortOrder::Descending,
        );

        let mut total: Option<InterfaceStats> = None;
        let mut run: Option<(InterfaceStats, InterfaceStats)> = None;
        for sample in samples {
            let same_pod = run
                .as_ref()
                .is_some_and(|(_, prev)| prev.pod_name == sample.pod_name);
            if same_pod {
                if let Some((acc, prev)) = run.as_mut() {
                    if prev.is_new_epoch(&sample) {
                        acc.add_counters(&sample);
                    }
                    *prev = sample;
                }
            } else {
                if let Some((acc, _)) = run.take() {
                    add_run(&mut total, acc);
                }
                run = Some((sample.clone(), sample));
            }
        }
        if let Some((acc, _)) = run {
            add_run(&mut total, acc);
        }

        let mut total = total?;
        total.socket_connections = include_socket_connections
            .then(|| self.socket_connections_for_controller(namespace, controller).connections);
        Some(total)
    }

    /// [`Self::sum_for_controller`] for every controller in `namespace`.
    pub fn traffic_sums_for_namespace(&self, namespace: &str) -> Vec<InterfaceStats> {
        let scope_keys = match self.backend.keys_by_prefix(
            Bucket::TrafficStats,
            &keys::series_prefix(namespace),
            SortOrder::None,
        ) {
            Ok(found) => found,
            Err(e) => {
                warn!(%namespace, error = %e, "failed to list traffic scopes");
                return Vec::new();
            }
        };

        let controllers: BTreeSet<&str> = scope_keys
            .iter()
            .filter_map(|k| keys::scope_of(k))
            .filter_map(|scope| scope.strip_prefix(namespace)?.strip_prefix('/'))
            .collect();

        controllers
            .into_iter()
            .filter_map(|controller| self.sum_for_controller(namespace, controller, false))
            .collect()
    }

    // ── Nodes ──────────────────────────────────────────────────────

    pub fn node_stats(&self, node: &str) -> Vec<NodeStats> {
        self.read(Bucket::NodeStats, &keys::series_prefix(node), SortOrder::Ascending)
    }

    pub fn last_node_stats(&self, node: &str) -> Option<NodeStats> {
        self.newest(Bucket::NodeStats, node)
    }

    // ── Socket connections ─────────────────────────────────────────

    pub fn socket_connections_for_pod(
        &self,
        namespace: &str,
        controller: &str,
        pod_name: &str,
    ) -> SocketConnections {
        let key = socket_key(namespace, controller, pod_name);
        match self.backend.get(Bucket::SocketStats, &key) {
            Ok(Some(bytes)) => {
                codec::decode_or_skip(Bucket::SocketStats, &key, &bytes).unwrap_or_default()
            }
            Ok(None) => SocketConnections::default(),
            Err(e) => {
                warn!(%key, error = %e, "failed to read socket connections");
                SocketConnections::default()
            }
        }
    }

    /// Connections of all pods of a controller, counts summed.
    pub fn socket_connections_for_controller(
        &self,
        namespace: &str,
        controller: &str,
    ) -> SocketConnections {
        let prefix = keys::series_prefix(&controller_scope(namespace, controller));
        let mut merged = SocketConnections::default();
        for pod in self.read::<SocketConnections>(Bucket::SocketStats, &prefix, SortOrder::None) {
            merged.merge(&pod);
        }
        merged
    }

    // ── Aggregation ────────────────────────────────────────────────

    /// Per-minute chart of `metric` over the last `offset_minutes` samples
    /// of each resource, summed across resources.
    ///
    /// Traffic counters are cumulative, so traffic charts are converted to
    /// per-minute increases.
    pub fn windowed_aggregate(
        &self,
        metric: ChartMetric,
        offset_minutes: u64,
        resources: &[ControllerRef],
    ) -> Vec<ChartEntry> {
        let window = usize::try_from(clamp_window(offset_minutes)).unwrap_or(usize::MAX);
        let bucket = match metric {
            ChartMetric::Cpu | ChartMetric::Memory => Bucket::PodStats,
            ChartMetric::Traffic => Bucket::TrafficStats,
        };

        let mut buckets = MinuteBuckets::new();
        for resource in resources {
            let scope = controller_scope(&resource.namespace, &resource.name);
            let values = match self.backend.last_n(bucket, &scope, window) {
                Ok(values) => values,
                Err(e) => {
                    warn!(%bucket, %scope, error = %e, "failed to read chart samples");
                    continue;
                }
            };

            for bytes in &values {
                let point = match metric {
                    ChartMetric::Cpu => codec::decode_or_skip::<PodStats>(bucket, &scope, bytes)
                        .map(|s| (s.created_at, s.cpu as f64)),
                    ChartMetric::Memory => codec::decode_or_skip::<PodStats>(bucket, &scope, bytes)
                        .map(|s| (s.created_at, s.memory as f64)),
                    ChartMetric::Traffic => {
                        codec::decode_or_skip::<InterfaceStats>(bucket, &scope, bytes)
                            .map(|s| (s.created_at, s.traffic_bytes() as f64))
                    }
                };
                if let Some((created_at, value)) = point {
                    buckets.add(created_at, value);
                }
            }
        }

        let entries = buckets.into_entries();
        match metric {
            ChartMetric::Traffic => to_deltas(&entries),
            ChartMetric::Cpu | ChartMetric::Memory => entries,
        }
    }

    // ── Eviction ───────────────────────────────────────────────────

    /// Delete every series whose newest sample is older than [`RETENTION`],
    /// and every socket snapshot not updated within it.
    pub fn evict(&self) -> StatsResult<EvictionReport> {
        let cutoff = self.clock.now_secs().saturating_sub(RETENTION.as_secs());
        let mut report = EvictionReport::default();
        let mut batch = WriteBatch::new();

        self.stale_scopes::<PodStats>(Bucket::PodStats, cutoff, |s| s.created_at, &mut batch, &mut report)?;
        self.stale_scopes::<InterfaceStats>(
            Bucket::TrafficStats,
            cutoff,
            |s| s.created_at,
            &mut batch,
            &mut report,
        )?;
        self.stale_scopes::<NodeStats>(Bucket::NodeStats, cutoff, |s| s.created_at, &mut batch, &mut report)?;

        for (key, bytes) in self
            .backend
            .list_by_prefix(Bucket::SocketStats, "", SortOrder::None)?
        {
            let Some(snapshot) =
                codec::decode_or_skip::<SocketConnections>(Bucket::SocketStats, &key, &bytes)
            else {
                continue;
            };
            if snapshot.last_update < cutoff {
                batch.delete(Bucket::SocketStats, key);
                report.sockets_removed += 1;
            }
        }

        if !batch.is_empty() {
            self.backend.apply(batch)?;
        }
        if report.is_empty() {
            debug!("stats eviction found nothing to remove");
        } else {
            info!(
                scopes = report.scopes_removed,
                entries = report.entries_removed,
                sockets = report.sockets_removed,
                "stale stats evicted"
            );
        }
        Ok(report)
    }

    /// Queue deletes for every scope of `bucket` whose newest sample was
    /// created before `cutoff`.
    fn stale_scopes<T: DeserializeOwned>(
        &self,
        bucket: Bucket,
        cutoff: u64,
        created_at: impl Fn(&T) -> u64,
        batch: &mut WriteBatch,
        report: &mut EvictionReport,
    ) -> StatsResult<()> {
        let mut scopes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in self.backend.keys_by_prefix(bucket, "", SortOrder::Ascending)? {
            if let Some(scope) = keys::scope_of(&key) {
                scopes.entry(scope.to_string()).or_default().push(key);
            }
        }

        for (scope, series) in scopes {
            let Some(newest) = series.last() else {
                continue;
            };
            let Some(bytes) = self.backend.get(bucket, newest)? else {
                continue;
            };
            let Some(sample) = codec::decode_or_skip::<T>(bucket, newest, &bytes) else {
                continue;
            };
            if created_at(&sample) >= cutoff {
                continue;
            }

            debug!(%bucket, %scope, entries = series.len(), "evicting stale scope");
            report.scopes_removed += 1;
            report.entries_removed += series.len();
            for key in series {
                batch.delete(bucket, key);
            }
        }
        Ok(())
    }

    // ── CNI ────────────────────────────────────────────────────────

    /// Replace the stored CNI snapshot. Nodes missing from `entries` are
    /// removed.
    pub fn replace_cni_data(&self, entries: Vec<CniData>) -> StatsResult<()> {
        let mut by_node: BTreeMap<String, Vec<CniData>> = BTreeMap::new();
        for entry in entries {
            by_node.entry(entry.node.clone()).or_default().push(entry);
        }

        let existing = self
            .backend
            .keys_by_prefix(Bucket::CniConfig, "", SortOrder::None)?;

        let mut batch = WriteBatch::new();
        for (node, configs) in &by_node {
            batch.put(Bucket::CniConfig, node.as_str(), encode(configs)?, None);
        }
        let mut removed = 0;
        for node in existing {
            if !by_node.contains_key(&node) {
                batch.delete(Bucket::CniConfig, node);
                removed += 1;
            }
        }
        self.backend.apply(batch)?;

        debug!(nodes = by_node.len(), removed, "cni snapshot replaced");
        Ok(())
    }

    /// Every node's CNI configurations, ordered by node.
    pub fn cni_data(&self) -> Vec<CniData> {
        self.read::<Vec<CniData>>(Bucket::CniConfig, "", SortOrder::None)
            .into_iter()
            .flatten()
            .collect()
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn newest<T: DeserializeOwned>(&self, bucket: Bucket, scope: &str) -> Option<T> {
        let bytes = match self.backend.last_n(bucket, scope, 1) {
            Ok(values) => values.into_iter().next()?,
            Err(e) => {
                warn!(%bucket, %scope, error = %e, "stats read failed");
                return None;
            }
        };
        codec::decode_or_skip(bucket, scope, &bytes)
    }

    fn read<T: DeserializeOwned>(&self, bucket: Bucket, prefix: &str, order: SortOrder) -> Vec<T> {
        match self.backend.list_by_prefix(bucket, prefix, order) {
            Ok(records) => records
                .into_iter()
                .filter_map(|(key, bytes)| codec::decode_or_skip(bucket, &key, &bytes))
                .collect(),
            Err(e) => {
                warn!(%bucket, %prefix, error = %e, "stats read failed");
                Vec::new()
            }
        }
    }
}

fn controller_scope(namespace: &str, controller: &str) -> String {
    keys::series_scope(&[namespace, controller])
}

fn socket_key(namespace: &str, controller: &str, pod_name: &str) -> String {
    keys::series_scope(&[namespace, controller, pod_name])
}

fn add_run(total: &mut Option<InterfaceStats>, run: InterfaceStats) {
    match total {
        Some(total) => total.add_counters(&run),
        None => *total = Some(run),
    }
}

fn encode<T: Serialize>(value: &T) -> StatsResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StatsError::Serialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ManualClock;
    use crate::owner_cache::ControllerResolver;
    use keel_state::EmbeddedBackend;
    use std::time::Duration;

    const NOW: u64 = 1_700_000_000;

    /// Every pod belongs to the `api` deployment.
    struct SingleOwner;

    impl ControllerResolver for SingleOwner {
        fn resolve(&self, namespace: &str, _pod_name: &str) -> Option<ControllerRef> {
            Some(ControllerRef::new("Deployment", namespace, "api"))
        }
    }

    /// Pods named `{controller}-{n}`.
    struct ByPodPrefix;

    impl ControllerResolver for ByPodPrefix {
        fn resolve(&self, namespace: &str, pod_name: &str) -> Option<ControllerRef> {
            let (controller, _) = pod_name.rsplit_once('-')?;
            Some(ControllerRef::new("Deployment", namespace, controller))
        }
    }

    fn store_with(max_data_points: usize) -> (StatsStore, Arc<ManualClock>) {
        store_resolving(max_data_points, ControllerCache::default())
    }

    fn store_resolving(
        max_data_points: usize,
        controllers: ControllerCache,
    ) -> (StatsStore, Arc<ManualClock>) {
        let backend: SharedBackend = Arc::new(EmbeddedBackend::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(NOW));
        let config = StatsConfig {
            max_data_points,
            ..Default::default()
        };
        let store = StatsStore::new(backend, Arc::new(controllers), config, clock.clone());
        (store, clock)
    }

    fn pod(name: &str, cpu: i64) -> PodStats {
        PodStats {
            namespace: "shop".into(),
            pod_name: name.into(),
            container_name: "web".into(),
            cpu,
            memory: cpu * 1024,
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
    fn append_caps_series_at_max_data_points() {
        let (store, _) = store_with(3);
        for cpu in 1..=5 {
            store.append_pod_stats(pod("api", cpu));
        }

        let cpus: Vec<i64> = store
            .pod_stats_for_controller("shop", "api")
            .iter()
            .map(|s| s.cpu)
            .collect();
        assert_eq!(cpus, vec![3, 4, 5]);
        assert_eq!(store.last_pod_stats_for_controller("shop", "api").unwrap().cpu, 5);
    }

    #[test]
    fn concurrent_appends_to_one_scope_respect_the_cap() {
        let (store, _) = store_resolving(3, ControllerCache::new(Arc::new(SingleOwner)));
        for round in 0..20 {
            for cpu in 0..3 {
                store.append_pod_stats(pod(&format!("seed-{cpu}"), cpu));
            }

            let barrier = Arc::new(std::sync::Barrier::new(8));
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

            let stored = store.pod_stats_for_controller("shop", "api");
            assert_eq!(stored.len(), 3, "round {round}");
            assert!(stored.iter().all(|s| s.cpu >= 100));
        }
    }

    #[test]
    fn append_stamps_created_at() {
        let (store, clock) = store_with(10);
        clock.set(NOW + 42);
        store.append_node_stats(NodeStats {
            name: "node-a".into(),
            pod_count: 7,
            ..Default::default()
        });

        let last = store.last_node_stats("node-a").unwrap();
        assert_eq!(last.created_at, NOW + 42);
        assert_eq!(last.pod_count, 7);
        assert!(store.last_node_stats("node-b").is_none());
    }

    #[test]
    fn sum_adds_pods_and_keeps_newest_per_epoch() {
        let (store, _) = store_resolving(100, ControllerCache::new(Arc::new(SingleOwner)));
        for transmit in [10, 15, 22] {
            store.append_interface_stats(traffic("api-1", transmit));
        }
        for transmit in [2, 7] {
            store.append_interface_stats(traffic("api-2", transmit));
        }

        let sum = store.sum_for_controller("shop", "api", false).unwrap();
        assert_eq!(sum.transmit_bytes, 29);
        assert_eq!(sum.pod_name, "api-2");
        assert!(sum.socket_connections.is_none());
    }

    #[test]
    fn sum_counts_counter_resets_within_a_pod() {
        let (store, _) = store_with(100);
        // 40 then a reset to 5, then 12: the pre-reset epoch is added.
        for transmit in [30, 40, 5, 12] {
            store.append_interface_stats(traffic("solo", transmit));
        }
        let sum = store.sum_for_controller("shop", "solo", false).unwrap();
        assert_eq!(sum.transmit_bytes, 52);
        assert!(store.sum_for_controller("shop", "missing", false).is_none());
    }

    #[test]
    fn traffic_sums_one_entry_per_controller() {
        let (store, _) = store_resolving(100, ControllerCache::new(Arc::new(ByPodPrefix)));
        store.append_interface_stats(traffic("api-1", 10));
        store.append_interface_stats(traffic("worker-1", 100));
        store.append_interface_stats(traffic("api-1", 15));
        store.append_interface_stats(traffic("worker-1", 130));
        store.append_interface_stats(traffic("api-2", 5));

        let sums: Vec<u64> = store
            .traffic_sums_for_namespace("shop")
            .iter()
            .map(|s| s.transmit_bytes)
            .collect();
        assert_eq!(sums, vec![20, 130]);
        assert!(store.traffic_sums_for_namespace("empty").is_empty());
    }

    #[test]
    fn socket_connections_are_pruned_and_split_out() {
        let (store, _) = store_with(100);
        let mut entry = traffic("api-1", 1);
        entry.socket_connections = Some(BTreeMap::from([
            ("TCP-10.1.0.5:40000-10.96.0.10:53".to_string(), 6),
            ("TCP-10.1.0.5:40001-10.96.0.10:53".to_string(), 5),
        ]));
        store.append_interface_stats(entry);

        let stored = store.traffic_for_controller("shop", "api-1");
        assert_eq!(stored.len(), 1);
        assert!(stored[0].socket_connections.is_none());

        let sockets = store.socket_connections_for_pod("shop", "api-1", "api-1");
        assert_eq!(sockets.last_update, NOW);
        assert_eq!(sockets.connections.len(), 1);
        assert_eq!(sockets.unique_ips(), vec!["10.1.0.5", "10.96.0.10"]);

        let with_sockets = store.sum_for_controller("shop", "api-1", true).unwrap();
        assert_eq!(with_sockets.socket_connections.unwrap().len(), 1);
    }

    #[test]
    fn last_pod_stats_per_pod_in_namespace() {
        let (store, clock) = store_with(100);
        store.append_pod_stats(pod("a", 1));
        clock.advance(Duration::from_secs(60));
        store.append_pod_stats(pod("b", 2));
        clock.advance(Duration::from_secs(60));
        store.append_pod_stats(pod("a", 3));

        let last = store.last_pod_stats_for_namespace("shop");
        let cpus: Vec<(String, i64)> = last.into_iter().map(|s| (s.pod_name, s.cpu)).collect();
        assert_eq!(cpus, vec![("a".to_string(), 3), ("b".to_string(), 2)]);
        assert_eq!(store.pod_stats_for_namespace("shop").len(), 3);
    }

    #[test]
    fn windowed_cpu_sums_resources_per_minute() {
        let (store, clock) = store_with(100);
        store.append_pod_stats(pod("a", 100));
        store.append_pod_stats(pod("b", 50));
        clock.advance(Duration::from_secs(60));
        store.append_pod_stats(pod("a", 200));

        let resources = [
            ControllerRef::new("Pod", "shop", "a"),
            ControllerRef::new("Pod", "shop", "b"),
        ];
        let chart = store.windowed_aggregate(ChartMetric::Cpu, 60, &resources);
        assert_eq!(chart.len(), 2);
        assert_eq!(chart[0].value, 150.0);
        assert_eq!(chart[1].value, 200.0);
        assert_eq!(chart[1].time - chart[0].time, 60);
    }

    #[test]
    fn windowed_traffic_is_per_minute_increase() {
        let (store, clock) = store_with(100);
        for transmit in [100, 160, 10, 40] {
            store.append_interface_stats(traffic("a", transmit));
            clock.advance(Duration::from_secs(60));
        }

        let chart = store.windowed_aggregate(
            ChartMetric::Traffic,
            60,
            &[ControllerRef::new("Pod", "shop", "a")],
        );
        let values: Vec<f64> = chart.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![60.0, 30.0]);
    }

    #[test]
    fn cni_snapshot_replaces_nodes() {
        let (store, _) = store_with(100);
        let cni = |node: &str, name: &str| CniData {
            name: name.into(),
            node: node.into(),
            cni_version: "1.0.0".into(),
            plugins: Vec::new(),
        };

        store
            .replace_cni_data(vec![cni("n1", "calico"), cni("n1", "bandwidth"), cni("n2", "calico")])
            .unwrap();
        assert_eq!(store.cni_data().len(), 3);

        store.replace_cni_data(vec![cni("n2", "cilium")]).unwrap();
        let data = store.cni_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].name, "cilium");
    }
}
