//! Telemetry samples and aggregation outputs.
//!
//! Every sample carries `created_at`, stamped by the store at write time.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ── Samples ────────────────────────────────────────────────────────

/// Resource usage of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodStats {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    /// Millicores.
    pub cpu: i64,
    pub cpu_limit: i64,
    /// Bytes.
    pub memory: i64,
    pub memory_limit: i64,
    pub ephemeral_storage_limit: i64,
    pub start_time: u64,
    pub created_at: u64,
}

/// Cumulative interface counters of one pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterfaceStats {
    pub ip: String,
    pub pod_name: String,
    pub namespace: String,
    pub packets_sum: u64,
    pub transmit_bytes: u64,
    pub received_bytes: u64,
    pub unknown_bytes: u64,
    pub local_transmit_bytes: u64,
    pub local_received_bytes: u64,
    /// Counter values when the collector started observing the interface.
    pub transmit_start_bytes: u64,
    pub received_start_bytes: u64,
    pub start_time: u64,
    pub created_at: u64,
    /// Connection key → times observed. Moved to `socket-stats` on append.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_connections: Option<BTreeMap<String, u64>>,
}

impl InterfaceStats {
    /// Add the counters of `other`.
    pub fn add_counters(&mut self, other: &InterfaceStats) {
        self.packets_sum += other.packets_sum;
        self.transmit_bytes += other.transmit_bytes;
        self.received_bytes += other.received_bytes;
        self.unknown_bytes += other.unknown_bytes;
        self.local_transmit_bytes += other.local_transmit_bytes;
        self.local_received_bytes += other.local_received_bytes;
        self.transmit_start_bytes += other.transmit_start_bytes;
        self.received_start_bytes += other.received_start_bytes;
    }

    /// Whether `older` was sampled in a different counter epoch than
    /// `self`: the collector restarted, or the counters were reset in
    /// between.
    pub fn is_new_epoch(&self, older: &InterfaceStats) -> bool {
        older.transmit_start_bytes != self.transmit_start_bytes
            || older.received_start_bytes != self.received_start_bytes
            || older.packets_sum > self.packets_sum
            || older.transmit_bytes > self.transmit_bytes
            || older.received_bytes > self.received_bytes
            || older.unknown_bytes > self.unknown_bytes
            || older.local_transmit_bytes > self.local_transmit_bytes
            || older.local_received_bytes > self.local_received_bytes
    }

    /// Total bytes moved, as charted for traffic.
    pub fn traffic_bytes(&self) -> u64 {
        self.received_bytes + self.transmit_bytes
    }
}

static CONNECTION_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(TCP|UDP)-([\d.]+):(\d+)-([\d.]+):(\d+)$").expect("valid connection key pattern")
});

/// Socket connections of one pod, stored at `socket-stats/{ns}/{ctrl}/{pod}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketConnections {
    pub last_update: u64,
    /// `PROTO-srcIp:srcPort-dstIp:dstPort` → times observed.
    pub connections: BTreeMap<String, u64>,
}

impl SocketConnections {
    /// Source and destination addresses, deduplicated in first-seen order.
    ///
    /// Keys that do not parse, and connections with a `0.`-prefixed side,
    /// are skipped.
    pub fn unique_ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = Vec::new();
        for key in self.connections.keys() {
            let Some(caps) = CONNECTION_KEY.captures(key) else {
                continue;
            };
            let (src, dst) = (&caps[2], &caps[4]);
            if src.starts_with("0.") || dst.starts_with("0.") {
                continue;
            }
            for ip in [src, dst] {
                if !ips.iter().any(|known| known == ip) {
                    ips.push(ip.to_string());
                }
            }
        }
        ips
    }

    /// Add the counts of `other`.
    pub fn merge(&mut self, other: &SocketConnections) {
        for (key, count) in &other.connections {
            *self.connections.entry(key.clone()).or_default() += count;
        }
        self.last_update = self.last_update.max(other.last_update);
    }
}

/// Kubelet summary of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeStats {
    pub name: String,
    pub pod_count: i64,
    pub start_time: u64,
    pub cpu_usage_nano_cores: i64,
    pub memory_usage_bytes: i64,
    pub memory_available_bytes: i64,
    pub memory_working_set_bytes: i64,
    pub network_tx_bytes: i64,
    pub network_rx_bytes: i64,
    pub fs_available_bytes: i64,
    pub fs_capacity_bytes: i64,
    pub fs_used_bytes: i64,
    pub created_at: u64,
}

// ── CNI ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniPlugin {
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub log_level: Option<String>,
    pub log_file_path: Option<String>,
    pub datastore_type: Option<String>,
    pub nodename: Option<String>,
}

/// One CNI configuration found on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniData {
    pub name: String,
    pub node: String,
    pub cni_version: String,
    pub plugins: Vec<CniPlugin>,
}

// ── Aggregation ────────────────────────────────────────────────────

/// Metric charted by windowed aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartMetric {
    Cpu,
    Memory,
    Traffic,
}

/// One point of a chart: minute timestamp and value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartEntry {
    pub time: u64,
    pub value: f64,
}
