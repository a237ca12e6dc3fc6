//! Logical buckets, one per entity family.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    /// Build jobs keyed by `queue-{seq(buildId)}`.
    BuildQueue,
    /// Stage entries keyed by `{seq(buildId)}___{stage}___{ns}___{ctrl}___{container}`.
    BuildStageLog,
    /// Recent pod events keyed by `{ns}-{ctrl}`.
    PodEvents,
    /// Pod samples keyed by `{ns}/{ctrl}/{seq}`.
    PodStats,
    /// Interface samples keyed by `{ns}/{ctrl}/{seq}`.
    TrafficStats,
    /// Node samples keyed by `{node}/{seq}`.
    NodeStats,
    /// Socket connection snapshots keyed by `{ns}/{ctrl}/{pod}`.
    SocketStats,
    /// CNI configuration keyed by `{node}`.
    CniConfig,
    /// Applied migrations keyed by name.
    Migrations,
}

impl Bucket {
    pub const ALL: [Bucket; 9] = [
        Bucket::BuildQueue,
        Bucket::BuildStageLog,
        Bucket::PodEvents,
        Bucket::PodStats,
        Bucket::TrafficStats,
        Bucket::NodeStats,
        Bucket::SocketStats,
        Bucket::CniConfig,
        Bucket::Migrations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Bucket::BuildQueue => "build-queue",
            Bucket::BuildStageLog => "build-stage-log",
            Bucket::PodEvents => "pod-events",
            Bucket::PodStats => "pod-stats",
            Bucket::TrafficStats => "traffic-stats",
            Bucket::NodeStats => "node-stats",
            Bucket::SocketStats => "socket-stats",
            Bucket::CniConfig => "cni-config",
            Bucket::Migrations => "migrations",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
