//! Domain types for build jobs and their pipeline history.
//!
//! All types are JSON-encoded into the `build-queue`, `build-stage-log`
//! and `pod-events` buckets with camelCase field names.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Job state ──────────────────────────────────────────────────────

/// Lifecycle of a build job.
///
/// `Pending → Started → {Succeeded | Failed | Canceled}`. A job left in
/// `Started` by a crashed process is moved back to `Pending` on startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Pending,
    Started,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    /// Whether the job still occupies its (controller, commit) slot.
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobState::Pending | JobState::Started)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }

    /// Whether `next` is a legal successor in the lifecycle graph.
    ///
    /// `Started → Pending` is allowed for the crash-recovery sweep. Setting
    /// the current state again is a no-op and always allowed.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Pending, Started) | (Pending, Canceled) => true,
            (Started, Succeeded) | (Started, Failed) | (Started, Canceled) => true,
            (Started, Pending) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Started => "STARTED",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Pipeline stages ────────────────────────────────────────────────

/// One step of the build pipeline, in execution order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum BuildStage {
    #[default]
    GitClone,
    List,
    RegistryLogin,
    ImageBuild,
    ImagePush,
}

impl BuildStage {
    pub const ALL: [BuildStage; 5] = [
        BuildStage::GitClone,
        BuildStage::List,
        BuildStage::RegistryLogin,
        BuildStage::ImageBuild,
        BuildStage::ImagePush,
    ];

    /// Token used in stage-log keys.
    pub fn token(self) -> &'static str {
        match self {
            BuildStage::GitClone => "clone",
            BuildStage::List => "ls",
            BuildStage::RegistryLogin => "login",
            BuildStage::ImageBuild => "build",
            BuildStage::ImagePush => "push",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.token() == token)
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ── Build job ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentials {
    /// Registry path images are pushed to, e.g. `docker.io` or `ghcr.io/org`.
    pub path: String,
    pub url: String,
    pub user: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub id: String,
    pub registry: Option<RegistryCredentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRef {
    pub id: String,
    pub name: String,
}

/// Source of one container image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSource {
    pub name: String,
    pub git_repository: Option<String>,
    pub git_branch: Option<String>,
    pub git_commit_hash: Option<String>,
    pub git_commit_author: Option<String>,
    pub git_commit_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRef {
    pub id: String,
    pub controller_name: String,
    pub containers: Vec<ContainerSource>,
}

/// One build execution, stored at `build-queue/queue-{buildId}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildJob {
    /// Assigned by `enqueue`, never reused.
    pub build_id: u64,
    /// External correlation id; generated when empty.
    pub job_id: String,
    pub state: JobState,
    pub project: ProjectRef,
    pub namespace: NamespaceRef,
    pub service: ServiceRef,
    /// Image tag, derived on enqueue.
    pub image: String,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub duration_ms: u64,
    pub created_at: u64,
}

impl BuildJob {
    pub fn namespace_name(&self) -> &str {
        &self.namespace.name
    }

    pub fn controller_name(&self) -> &str {
        &self.service.controller_name
    }

    /// Commit hashes of all containers that carry one.
    pub fn commit_hashes(&self) -> impl Iterator<Item = &str> {
        self.service
            .containers
            .iter()
            .filter_map(|c| c.git_commit_hash.as_deref())
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSource> {
        self.service.containers.iter().find(|c| c.name == name)
    }
}

// ── Stage history ──────────────────────────────────────────────────

/// Result of one pipeline stage for one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildJobInfoEntry {
    pub stage: BuildStage,
    pub build_id: u64,
    pub project_id: String,
    pub namespace: String,
    pub controller: String,
    pub container: String,
    pub state: JobState,
    /// Captured command output.
    pub output: String,
    pub started_at: u64,
    pub finished_at: u64,
    pub duration_ms: u64,
}

/// All stage entries of one build, assembled for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildJobInfo {
    pub build_id: u64,
    pub project_id: String,
    pub namespace: String,
    pub controller: String,
    pub container: String,
    pub image: String,

    pub commit_hash: String,
    pub commit_link: Option<String>,
    pub commit_author: String,
    pub commit_message: String,

    pub clone: Option<BuildJobInfoEntry>,
    pub ls: Option<BuildJobInfoEntry>,
    pub login: Option<BuildJobInfoEntry>,
    pub build: Option<BuildJobInfoEntry>,
    pub push: Option<BuildJobInfoEntry>,

    pub state: Option<JobState>,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub duration_ms: u64,
}

impl BuildJobInfo {
    pub fn stage(&self, stage: BuildStage) -> Option<&BuildJobInfoEntry> {
        self.stage_slot(stage).as_ref()
    }

    fn stage_slot(&self, stage: BuildStage) -> &Option<BuildJobInfoEntry> {
        match stage {
            BuildStage::GitClone => &self.clone,
            BuildStage::List => &self.ls,
            BuildStage::RegistryLogin => &self.login,
            BuildStage::ImageBuild => &self.build,
            BuildStage::ImagePush => &self.push,
        }
    }

    pub(crate) fn set_stage(&mut self, stage: BuildStage, entry: BuildJobInfoEntry) {
        let slot = match stage {
            BuildStage::GitClone => &mut self.clone,
            BuildStage::List => &mut self.ls,
            BuildStage::RegistryLogin => &mut self.login,
            BuildStage::ImageBuild => &mut self.build,
            BuildStage::ImagePush => &mut self.push,
        };
        *slot = Some(entry);
    }

    /// Derive the overall state and timing from the recorded stages.
    pub(crate) fn summarize(&mut self) {
        let entries: Vec<&BuildJobInfoEntry> = BuildStage::ALL
            .into_iter()
            .filter_map(|stage| self.stage(stage))
            .collect();

        let state = entries.last().map(|e| e.state);
        let started_at = entries.iter().map(|e| e.started_at).min();
        let finished_at = entries.iter().map(|e| e.finished_at).max();

        self.state = state;
        self.started_at = started_at;
        self.finished_at = finished_at;
        self.duration_ms = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.saturating_sub(start) * 1000,
            _ => 0,
        };
    }

    /// Whether nothing was found for this build.
    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() && BuildStage::ALL.iter().all(|s| self.stage(*s).is_none())
    }
}

/// Counters over the whole build queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderStatus {
    pub total_builds: u64,
    pub total_build_time_ms: u64,
    pub queued_builds: u64,
    pub running_builds: u64,
    pub failed_builds: u64,
    pub canceled_builds: u64,
    pub finished_builds: u64,
}

// ── Pod events ─────────────────────────────────────────────────────

/// A Kubernetes event about one of a controller's pods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodEvent {
    pub uid: String,
    pub reason: String,
    pub message: String,
    pub event_type: String,
    pub count: u32,
    pub first_seen: u64,
    pub last_seen: u64,
}
