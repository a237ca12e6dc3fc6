//! BuildJobStore — the build queue and its per-stage history.
//!
//! Queue entries live in `build-queue` under `queue-{buildId}`; stage
//! results live in `build-stage-log` under
//! `{buildId}___{stage}___{namespace}___{controller}___{container}`.
//! Build ids come from the persistent `build-queue` counter and are never
//! reused.
//!
//! Write paths log and return their errors. History reads are best-effort
//! and return empty values when nothing (or nothing readable) is stored.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use keel_core::{BuildsConfig, Clock, HISTORY_LIMIT, SystemClock};
use keel_state::keys::{self, SortOrder};
use keel_state::{Bucket, SharedBackend, WriteBatch, codec};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{BuildError, BuildResult};
use crate::image::{commit_link, image_names};
use crate::types::{
    BuildJob, BuildJobInfo, BuildJobInfoEntry, BuildStage, BuilderStatus, JobState, PodEvent,
};

/// Counter that mints build ids.
pub const BUILD_QUEUE_COUNTER: &str = "build-queue";

/// Bytes of randomness in a generated job id (24 hex characters).
const JOB_ID_BYTES: usize = 12;

#[derive(Clone)]
pub struct BuildJobStore {
    backend: SharedBackend,
    config: BuildsConfig,
    clock: Arc<dyn Clock>,
    /// Serializes duplicate check, id allocation and persist in `enqueue`.
    enqueue_lock: Arc<Mutex<()>>,
    /// Serializes read-modify-write of pod event snapshots.
    events_lock: Arc<Mutex<()>>,
}

impl BuildJobStore {
    pub fn new(backend: SharedBackend, config: BuildsConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: SharedBackend, config: BuildsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            config,
            clock,
            enqueue_lock: Arc::new(Mutex::new(())),
            events_lock: Arc::new(Mutex::new(())),
        }
    }

    fn ttl(&self) -> Option<Duration> {
        self.config.build_ttl()
    }

    // ── Queue ──────────────────────────────────────────────────────

    /// Queue a new build and return its build id.
    ///
    /// Fails with [`BuildError::DuplicateBuild`] when a pending or started
    /// job of the same controller already builds one of the job's commits.
    /// A rejected job does not consume a build id.
    pub fn enqueue(&self, mut job: BuildJob) -> BuildResult<u64> {
        if job.job_id.is_empty() {
            job.job_id = new_job_id()?;
        }
        job.state = JobState::Pending;

        let _guard = lock(&self.enqueue_lock);

        if let Some((existing_build_id, commit_hash)) = self.find_in_flight_duplicate(&job)? {
            warn!(
                controller = %job.controller_name(),
                %commit_hash,
                existing_build_id,
                "duplicate commit already queued, skipping build"
            );
            return Err(BuildError::DuplicateBuild {
                controller: job.controller_name().to_string(),
                commit_hash,
                existing_build_id,
            });
        }

        let build_id = self.backend.next_sequence(BUILD_QUEUE_COUNTER)?;
        job.build_id = build_id;
        job.image = image_names(&job, &self.config.local_registry_host).tag;
        job.created_at = self.clock.now_secs();

        if let Err(e) = self.write_job(&job) {
            error!(build_id, error = %e, "failed to persist build job");
            return Err(e);
        }
        info!(
            build_id,
            job_id = %job.job_id,
            namespace = %job.namespace_name(),
            controller = %job.controller_name(),
            "build job enqueued"
        );
        Ok(build_id)
    }

    /// The in-flight job of the same controller sharing a commit hash with `job`.
    fn find_in_flight_duplicate(&self, job: &BuildJob) -> BuildResult<Option<(u64, String)>> {
        let wanted: HashSet<&str> = job.commit_hashes().collect();
        if wanted.is_empty() {
            return Ok(None);
        }

        for existing in self.list_jobs()? {
            if !existing.state.is_in_flight()
                || existing.namespace_name() != job.namespace_name()
                || existing.controller_name() != job.controller_name()
            {
                continue;
            }
            if let Some(hash) = existing.commit_hashes().find(|h| wanted.contains(h)) {
                return Ok(Some((existing.build_id, hash.to_string())));
            }
        }
        Ok(None)
    }

    /// Overwrite the queue entry of `job.build_id`.
    pub fn save_job(&self, job: &BuildJob) -> BuildResult<()> {
        self.write_job(job).inspect_err(|e| {
            error!(build_id = job.build_id, error = %e, "failed to save build job");
        })
    }

    fn write_job(&self, job: &BuildJob) -> BuildResult<()> {
        let key = keys::queue_key(job.build_id);
        self.backend
            .put(Bucket::BuildQueue, &key, &encode(job)?, self.ttl())?;
        debug!(%key, state = %job.state, "build job stored");
        Ok(())
    }

    pub fn get_job(&self, build_id: u64) -> BuildResult<Option<BuildJob>> {
        let key = keys::queue_key(build_id);
        Ok(self
            .backend
            .get(Bucket::BuildQueue, &key)?
            .and_then(|bytes| codec::decode_or_skip(Bucket::BuildQueue, &key, &bytes)))
    }

    /// Move a job to `state`.
    ///
    /// The lifecycle graph is not enforced: an illegal transition is logged
    /// and written anyway. Entering `Started` stamps `started_at`; entering
    /// a terminal state stamps `finished_at` and `duration_ms`.
    pub fn set_state(&self, build_id: u64, state: JobState) -> BuildResult<BuildJob> {
        let mut job = self
            .get_job(build_id)?
            .ok_or(BuildError::NotFound(build_id))?;

        if !job.state.can_transition_to(state) {
            warn!(build_id, from = %job.state, to = %state, "illegal job state transition");
        }

        let now = self.clock.now_secs();
        job.state = state;
        match state {
            JobState::Started => job.started_at = Some(now),
            s if s.is_terminal() => {
                job.finished_at = Some(now);
                job.duration_ms = job
                    .started_at
                    .map_or(0, |start| now.saturating_sub(start) * 1000);
            }
            _ => {}
        }

        if let Err(e) = self.write_job(&job) {
            error!(build_id, error = %e, "failed to update job state");
            return Err(e);
        }
        info!(build_id, %state, "build job state updated");
        Ok(job)
    }

    pub fn delete_job(&self, build_id: u64) -> BuildResult<bool> {
        let removed = self
            .backend
            .delete(Bucket::BuildQueue, &keys::queue_key(build_id))?;
        if removed {
            info!(build_id, "build job deleted");
        }
        Ok(removed)
    }

    /// All queued jobs, ascending by build id.
    pub fn list_jobs(&self) -> BuildResult<Vec<BuildJob>> {
        Ok(self
            .backend
            .list_by_prefix(Bucket::BuildQueue, keys::QUEUE_PREFIX, SortOrder::Ascending)?
            .into_iter()
            .filter_map(|(key, bytes)| codec::decode_or_skip(Bucket::BuildQueue, &key, &bytes))
            .collect())
    }

    /// Jobs waiting to be built, oldest first.
    pub fn list_pending(&self) -> BuildResult<Vec<BuildJob>> {
        let mut jobs = self.list_jobs()?;
        jobs.retain(|job| job.state == JobState::Pending);
        Ok(jobs)
    }

    /// Return every job left `Started` by a previous process to `Pending`.
    ///
    /// Runs once at startup before any worker picks up jobs. Returns the
    /// number of jobs reset.
    pub fn recover_interrupted_jobs(&self) -> BuildResult<usize> {
        let mut batch = WriteBatch::new();
        let mut recovered = Vec::new();
        for mut job in self.list_jobs()? {
            if job.state != JobState::Started {
                continue;
            }
            job.state = JobState::Pending;
            job.started_at = None;
            batch.put(
                Bucket::BuildQueue,
                keys::queue_key(job.build_id),
                encode(&job)?,
                self.ttl(),
            );
            recovered.push(job.build_id);
        }

        if !batch.is_empty() {
            self.backend.apply(batch).inspect_err(|e| {
                error!(error = %e, "failed to reset interrupted build jobs");
            })?;
            warn!(build_ids = ?recovered, "reset interrupted build jobs to pending");
        }
        info!(count = recovered.len(), "crash recovery sweep complete");
        Ok(recovered.len())
    }

    /// Totals over the whole queue. Empty on read failure.
    pub fn builder_status(&self) -> BuilderStatus {
        let jobs = match self.list_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "failed to read build queue for status");
                return BuilderStatus::default();
            }
        };

        let mut status = BuilderStatus::default();
        for job in jobs {
            status.total_builds += 1;
            status.total_build_time_ms += job.duration_ms;
            match job.state {
                JobState::Pending => status.queued_builds += 1,
                JobState::Started => status.running_builds += 1,
                JobState::Failed => status.failed_builds += 1,
                JobState::Canceled => status.canceled_builds += 1,
                JobState::Succeeded => status.finished_builds += 1,
            }
        }
        status
    }

    // ── Stage history ──────────────────────────────────────────────

    /// Record the outcome of one pipeline stage for one container.
    ///
    /// Re-running a stage overwrites only that stage's entry.
    #[allow(clippy::too_many_arguments)]
    pub fn record_stage_result(
        &self,
        state: JobState,
        stage: BuildStage,
        output: &str,
        started_at: u64,
        finished_at: u64,
        job: &BuildJob,
        container: &str,
    ) -> BuildResult<()> {
        let entry = BuildJobInfoEntry {
            stage,
            build_id: job.build_id,
            project_id: job.project.id.clone(),
            namespace: job.namespace_name().to_string(),
            controller: job.controller_name().to_string(),
            container: container.to_string(),
            state,
            output: output.to_string(),
            started_at,
            finished_at,
            duration_ms: finished_at.saturating_sub(started_at) * 1000,
        };
        let key = keys::stage_key(
            job.build_id,
            stage.token(),
            &entry.namespace,
            &entry.controller,
            container,
        );

        let result = encode(&entry).and_then(|bytes| {
            self.backend
                .put(Bucket::BuildStageLog, &key, &bytes, self.ttl())
                .map_err(BuildError::from)
        });
        match &result {
            Ok(()) => debug!(%key, %state, "stage result stored"),
            Err(e) => error!(build_id = job.build_id, %stage, error = %e, "failed to save stage result"),
        }
        result
    }

    /// Everything recorded for one build.
    ///
    /// When the queue entry is gone the result only carries `build_id`.
    pub fn get_history(&self, build_id: u64) -> BuildJobInfo {
        let mut info = BuildJobInfo {
            build_id,
            ..Default::default()
        };

        let job = match self.get_job(build_id) {
            Ok(Some(job)) => job,
            Ok(None) => return info,
            Err(e) => {
                warn!(build_id, error = %e, "failed to read build job");
                return info;
            }
        };

        let namespace = job.namespace_name();
        let controller = job.controller_name();
        let container = self
            .history_container(build_id, namespace, controller)
            .or_else(|| job.service.containers.first().map(|c| c.name.clone()))
            .unwrap_or_default();

        for stage in BuildStage::ALL {
            let key = keys::stage_key(build_id, stage.token(), namespace, controller, &container);
            match self.backend.get(Bucket::BuildStageLog, &key) {
                Ok(Some(bytes)) => {
                    if let Some(entry) =
                        codec::decode_or_skip::<BuildJobInfoEntry>(Bucket::BuildStageLog, &key, &bytes)
                    {
                        info.set_stage(stage, entry);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(%key, error = %e, "failed to read stage entry"),
            }
        }

        info.project_id = job.project.id.clone();
        info.namespace = namespace.to_string();
        info.controller = controller.to_string();
        info.image = job.image.clone();
        if let Some(source) = job.container(&container) {
            info.commit_hash = source.git_commit_hash.clone().unwrap_or_default();
            info.commit_author = source.git_commit_author.clone().unwrap_or_default();
            info.commit_message = source.git_commit_message.clone().unwrap_or_default();
            info.commit_link = match (&source.git_repository, &source.git_commit_hash) {
                (Some(repo), Some(hash)) => commit_link(repo, hash),
                _ => None,
            };
        }
        info.container = container;
        info.summarize();
        info
    }

    /// Container whose stages make up the history of `build_id`.
    ///
    /// Prefers the container of the git-clone stage, then image-build, then
    /// any stage.
    fn history_container(&self, build_id: u64, namespace: &str, controller: &str) -> Option<String> {
        let stage_keys = match self.backend.keys_by_prefix(
            Bucket::BuildStageLog,
            &keys::stage_prefix(build_id),
            SortOrder::None,
        ) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(build_id, error = %e, "failed to list stage entries");
                return None;
            }
        };

        let parsed: Vec<keys::StageKey> = stage_keys
            .iter()
            .filter_map(|k| keys::parse_stage_key(k))
            .filter(|k| k.namespace == namespace && k.controller == controller)
            .collect();

        [BuildStage::GitClone, BuildStage::ImageBuild]
            .iter()
            .find_map(|stage| parsed.iter().find(|k| k.stage == stage.token()))
            .or_else(|| parsed.first())
            .map(|k| k.container.clone())
    }

    /// Build ids with stage entries matching `filter`, newest first.
    fn recent_build_ids<F>(&self, limit: usize, filter: F) -> Vec<u64>
    where
        F: Fn(&str) -> bool,
    {
        let stage_keys =
            match self
                .backend
                .keys_by_prefix(Bucket::BuildStageLog, "", SortOrder::Descending)
            {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "failed to list stage entries");
                    return Vec::new();
                }
            };

        let mut seen = BTreeSet::new();
        let mut ids = Vec::new();
        for key in stage_keys.iter().filter(|k| filter(k.as_str())) {
            let Some(build_id) = keys::sequence_of(key) else {
                continue;
            };
            if seen.insert(build_id) {
                ids.push(build_id);
                if ids.len() >= limit {
                    break;
                }
            }
        }
        ids
    }

    /// The most recent builds of one container, newest first, at most
    /// [`HISTORY_LIMIT`].
    pub fn list_history_for(
        &self,
        namespace: &str,
        controller: &str,
        container: &str,
    ) -> Vec<BuildJobInfo> {
        let suffix = keys::stage_suffix(namespace, controller, container);
        self.recent_build_ids(HISTORY_LIMIT, |key| key.ends_with(&suffix))
            .into_iter()
            .map(|build_id| self.get_history(build_id))
            .collect()
    }

    /// The latest build of one container, or an empty record.
    pub fn last_build_for(&self, namespace: &str, controller: &str, container: &str) -> BuildJobInfo {
        let suffix = keys::stage_suffix(namespace, controller, container);
        self.recent_build_ids(1, |key| key.ends_with(&suffix))
            .first()
            .map(|build_id| self.get_history(*build_id))
            .unwrap_or_default()
    }

    /// The latest build of any container of a controller, or an empty record.
    pub fn last_build_for_controller(&self, namespace: &str, controller: &str) -> BuildJobInfo {
        let infix = keys::stage_controller_infix(namespace, controller);
        self.recent_build_ids(1, |key| key.contains(&infix))
            .first()
            .map(|build_id| self.get_history(*build_id))
            .unwrap_or_default()
    }

    // ── Cleanup ────────────────────────────────────────────────────

    /// Delete all build data of a container: its stage entries, the queue
    /// entries of those builds and the controller's pod event snapshot.
    ///
    /// Returns the number of builds removed.
    pub fn purge_all(&self, namespace: &str, controller: &str, container: &str) -> BuildResult<usize> {
        let suffix = keys::stage_suffix(namespace, controller, container);
        let stage_keys = self
            .backend
            .keys_by_prefix(Bucket::BuildStageLog, "", SortOrder::None)?;

        let mut batch = WriteBatch::new();
        let mut build_ids = BTreeSet::new();
        for key in stage_keys.into_iter().filter(|k| k.ends_with(&suffix)) {
            if let Some(parsed) = keys::parse_stage_key(&key) {
                build_ids.insert(parsed.build_id);
            }
            batch.delete(Bucket::BuildStageLog, key);
        }
        for build_id in &build_ids {
            batch.delete(Bucket::BuildQueue, keys::queue_key(*build_id));
        }
        batch.delete(Bucket::PodEvents, keys::pod_event_key(namespace, controller));

        self.backend.apply(batch).inspect_err(|e| {
            error!(%namespace, %controller, %container, error = %e, "failed to purge build data");
        })?;
        info!(%namespace, %controller, %container, builds = build_ids.len(), "purged build data");
        Ok(build_ids.len())
    }

    /// Delete stage entries whose queue entry no longer exists.
    pub fn purge_orphaned_stage_entries(&self) -> BuildResult<usize> {
        let live: HashSet<u64> = self
            .backend
            .keys_by_prefix(Bucket::BuildQueue, keys::QUEUE_PREFIX, SortOrder::None)?
            .iter()
            .filter_map(|k| keys::parse_queue_key(k))
            .collect();

        let mut batch = WriteBatch::new();
        for key in self
            .backend
            .keys_by_prefix(Bucket::BuildStageLog, "", SortOrder::None)?
        {
            match keys::parse_stage_key(&key) {
                Some(parsed) if !live.contains(&parsed.build_id) => {
                    batch.delete(Bucket::BuildStageLog, key);
                }
                Some(_) => {}
                None => warn!(%key, "skipping unparseable stage key"),
            }
        }

        let removed = batch.len();
        if removed > 0 {
            self.backend.apply(batch)?;
        }
        info!(removed, "purged orphaned stage entries");
        Ok(removed)
    }

    // ── Pod events ─────────────────────────────────────────────────

    /// Append an event to the controller's snapshot, keeping at most
    /// `max_pod_events`.
    ///
    /// Events already present (same uid) are ignored.
    pub fn record_pod_event(&self, namespace: &str, controller: &str, event: PodEvent) -> BuildResult<()> {
        let key = keys::pod_event_key(namespace, controller);
        let _guard = lock(&self.events_lock);

        let mut events: Vec<PodEvent> = match self.backend.get(Bucket::PodEvents, &key)? {
            Some(bytes) => codec::decode_or_skip(Bucket::PodEvents, &key, &bytes).unwrap_or_default(),
            None => Vec::new(),
        };
        if events.iter().any(|e| e.uid == event.uid) {
            return Ok(());
        }

        events.push(event);
        let excess = events.len().saturating_sub(self.config.max_pod_events.max(1));
        events.drain(..excess);

        self.backend.put(Bucket::PodEvents, &key, &encode(&events)?, None)?;
        debug!(%key, count = events.len(), "pod event stored");
        Ok(())
    }

    /// The controller's event snapshot, oldest first.
    pub fn pod_events(&self, namespace: &str, controller: &str) -> Vec<PodEvent> {
        let key = keys::pod_event_key(namespace, controller);
        match self.backend.get(Bucket::PodEvents, &key) {
            Ok(Some(bytes)) => codec::decode_or_skip(Bucket::PodEvents, &key, &bytes).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(%key, error = %e, "failed to read pod events");
                Vec::new()
            }
        }
    }
}

fn encode<T: Serialize>(value: &T) -> BuildResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| BuildError::Serialize(e.to_string()))
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_job_id() -> BuildResult<String> {
    let mut bytes = [0u8; JOB_ID_BYTES];
    getrandom::getrandom(&mut bytes).map_err(|e| BuildError::JobId(e.to_string()))?;
    Ok(hex::encode(bytes))
}
