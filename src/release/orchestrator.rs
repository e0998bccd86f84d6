//! Release run orchestration.
//!
//! The previous tag is resolved once. Every build job then runs on its own
//! worker, bounded by a semaphore, and reports back over a channel. A job's
//! failure never touches its siblings.

use super::archive::ArtifactMerger;
use super::builder::Toolchain;
use super::error::{PackagingError, TagResolutionError};
use super::matrix::BuildJob;
use super::packager::Packager;
use super::publisher::{PublishResult, Publisher};
use super::state::{JobState, JobTracker, TransitionError};
use super::store::ReleaseStore;
use super::tag::{TagSource, resolve_previous_tag};
use super::utils::fs;
use super::ReleaseContext;
use crate::config::defaults;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

const CANCELLED: &str = "cancelled";

/// Knobs of a single run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of jobs running at once
    pub concurrency: usize,
    /// Parent of the job-scoped work directories
    pub work_root: PathBuf,
    /// Leave work directories in place after each job
    pub keep_work_dir: bool,
    /// File name patterns stripped from bundles
    pub sidecar_patterns: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().max(1),
            work_root: std::env::temp_dir()
                .join(format!("nightly-publish-{}", uuid::Uuid::new_v4())),
            keep_work_dir: false,
            sidecar_patterns: defaults::sidecar_patterns(),
        }
    }
}

/// Terminal outcome of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub state: JobState,
    /// Every state the job entered, in order
    pub history: Vec<JobState>,
    pub duration_ms: u64,
    pub published: Option<PublishResult>,
}

impl JobReport {
    fn from_tracker(tracker: JobTracker, started: Instant, published: Option<PublishResult>) -> Self {
        let job_id = tracker.job().to_string();
        let (state, history) = tracker.into_parts();
        Self {
            job_id,
            state,
            history,
            duration_ms: started.elapsed().as_millis() as u64,
            published,
        }
    }

    /// Report for a worker that died without reporting (panic)
    fn lost(job_id: &str, reason: String) -> Self {
        let mut tracker = JobTracker::new(job_id);
        if let Err(e) = tracker.fail(reason) {
            log::error!("{}", e);
        }
        Self::from_tracker(tracker, Instant::now(), None)
    }

    pub fn is_published(&self) -> bool {
        self.state == JobState::Published
    }
}

/// Aggregate outcome of a run, ordered like the build matrix
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub project: String,
    pub channel: String,
    pub tag: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub jobs: Vec<JobReport>,
}

impl RunSummary {
    /// True when every job was published
    pub fn is_success(&self) -> bool {
        self.jobs.iter().all(JobReport::is_published)
    }

    /// Process exit code: 0 when every job was published, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn published_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_published()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.state, JobState::Failed { .. }))
            .count()
    }

    pub fn blocked_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.state, JobState::Blocked { .. }))
            .count()
    }

    pub fn job(&self, job_id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.job_id == job_id)
    }
}

/// Why a job stopped before publishing
enum Halt {
    Blocked(String),
    Failed(String),
}

impl From<TransitionError> for Halt {
    fn from(e: TransitionError) -> Self {
        Halt::Failed(e.to_string())
    }
}

fn failed(e: impl std::fmt::Display) -> Halt {
    Halt::Failed(e.to_string())
}

/// Runs `fut` unless the run is cancelled first
async fn race<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Halt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Halt::Failed(CANCELLED.to_string())),
        out = fut => Ok(out),
    }
}

fn enter(tracker: &mut JobTracker, next: JobState, cancel: &CancellationToken) -> Result<(), Halt> {
    if cancel.is_cancelled() {
        return Err(Halt::Failed(CANCELLED.to_string()));
    }
    tracker.advance(next)?;
    Ok(())
}

/// Everything a worker needs, shared across workers
struct JobPipeline<T, S> {
    ctx: ReleaseContext,
    toolchain: Arc<T>,
    packager: Packager,
    merger: ArtifactMerger<S>,
    publisher: Publisher<S>,
    work_root: PathBuf,
    keep_work_dir: bool,
}

impl<T: Toolchain, S: ReleaseStore> JobPipeline<T, S> {
    async fn run_job(&self, job: BuildJob, cancel: CancellationToken) -> JobReport {
        let started = Instant::now();
        let mut tracker = JobTracker::new(&job.id);
        let work_dir = self.work_root.join(&job.id);

        let outcome = self.drive(&job, &mut tracker, &work_dir, &cancel).await;

        let published = match outcome {
            Ok(result) => {
                log::info!("[{}] Published {}", job.id, result.asset_name);
                Some(result)
            }
            Err(halt) => {
                let settled = match halt {
                    Halt::Blocked(reason) => {
                        log::warn!("[{}] Blocked: {}", job.id, reason);
                        tracker.block(reason)
                    }
                    Halt::Failed(reason) => {
                        log::error!("[{}] Failed: {}", job.id, reason);
                        tracker.fail(reason)
                    }
                };
                if let Err(e) = settled {
                    log::error!("{}", e);
                }
                None
            }
        };

        if self.keep_work_dir {
            log::info!("[{}] Keeping work directory {}", job.id, work_dir.display());
        } else if let Err(e) = fs::remove_dir_all(&work_dir).await {
            log::warn!(
                "[{}] Failed to remove work directory {}: {}",
                job.id,
                work_dir.display(),
                e
            );
        }

        JobReport::from_tracker(tracker, started, published)
    }

    async fn drive(
        &self,
        job: &BuildJob,
        tracker: &mut JobTracker,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PublishResult, Halt> {
        if job.prep.is_some() {
            enter(tracker, JobState::Preparing, cancel)?;
            race(cancel, self.toolchain.prepare(job))
                .await?
                .map_err(|e| Halt::Blocked(e.to_string()))?;
        }

        enter(tracker, JobState::Building, cancel)?;
        let target_dir = work_dir.join("target");
        fs::create_dir_all(&target_dir, false)
            .await
            .map_err(failed)?;
        let mut artifacts = Vec::with_capacity(job.binaries.len());
        for binary in &job.binaries {
            let artifact = race(cancel, self.toolchain.build(job, binary, &target_dir))
                .await?
                .map_err(failed)?;
            log::debug!(
                "[{}] Built {} ({} bytes, sha256 {})",
                job.id,
                artifact.binary_name,
                artifact.size,
                artifact.sha256
            );
            artifacts.push(artifact);
        }
        let version_text = race(cancel, self.toolchain.version_report(job))
            .await?
            .map_err(failed)?;

        enter(tracker, JobState::Packaging, cancel)?;
        let bundle = race(
            cancel,
            self.packager
                .package(&self.ctx, job, &artifacts, &version_text, work_dir),
        )
        .await?
        .map_err(failed)?;

        enter(tracker, JobState::Merging, cancel)?;
        let archive = race(cancel, self.merger.merge(&self.ctx, &job.id, &bundle))
            .await?
            .map_err(failed)?;

        enter(tracker, JobState::Publishing, cancel)?;
        let published = race(cancel, self.publisher.publish(&self.ctx, &job.id, &archive))
            .await?
            .map_err(failed)?;

        tracker.advance(JobState::Published)?;
        Ok(published)
    }
}

/// Drives a release run over a toolchain and a release store
#[derive(Debug)]
pub struct Orchestrator<T, S> {
    project: String,
    channel: String,
    toolchain: Arc<T>,
    store: Arc<S>,
    packager: Packager,
    options: RunOptions,
}

impl<T, S> Orchestrator<T, S>
where
    T: Toolchain + 'static,
    S: ReleaseStore + 'static,
{
    pub fn new(
        project: impl Into<String>,
        channel: impl Into<String>,
        toolchain: Arc<T>,
        store: Arc<S>,
        options: RunOptions,
    ) -> Result<Self, PackagingError> {
        let packager = Packager::new(&options.sidecar_patterns)?;
        Ok(Self {
            project: project.into(),
            channel: channel.into(),
            toolchain,
            store,
            packager,
            options,
        })
    }

    /// Resolves the previous tag, then runs every job against it.
    ///
    /// Tag resolution failure aborts the run before any job starts.
    pub async fn run(
        &self,
        tags: &impl TagSource,
        jobs: Vec<BuildJob>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, TagResolutionError> {
        let tag = resolve_previous_tag(tags).await?;
        let ctx = ReleaseContext::new(self.project.clone(), self.channel.clone(), tag);
        Ok(self.run_with_context(ctx, jobs, cancel).await)
    }

    /// Runs every job against an already resolved release context
    pub async fn run_with_context(
        &self,
        ctx: ReleaseContext,
        jobs: Vec<BuildJob>,
        cancel: CancellationToken,
    ) -> RunSummary {
        let started_at = Utc::now();
        log::info!(
            "Releasing {} {} against {}: {} job(s), up to {} at once",
            ctx.project,
            ctx.channel,
            ctx.tag,
            jobs.len(),
            self.options.concurrency
        );

        let pipeline = Arc::new(JobPipeline {
            ctx: ctx.clone(),
            toolchain: self.toolchain.clone(),
            packager: self.packager.clone(),
            merger: ArtifactMerger::new(self.store.clone()),
            publisher: Publisher::new(self.store.clone()),
            work_root: self.options.work_root.clone(),
            keep_work_dir: self.options.keep_work_dir,
        });
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let (tx, mut rx) = mpsc::channel::<(usize, JobReport)>(jobs.len().max(1));
        let job_ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();

        for (index, job) in jobs.into_iter().enumerate() {
            let tx = tx.clone();
            let semaphore = semaphore.clone();
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let job_id = job.id.clone();
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let report = match permit {
                    Some(permit) => {
                        let worker =
                            tokio::spawn(async move { pipeline.run_job(job, cancel).await });
                        let report = match worker.await {
                            Ok(report) => report,
                            Err(e) => {
                                log::error!("[{}] Worker panicked: {}", job_id, e);
                                JobReport::lost(&job_id, format!("worker panicked: {}", e))
                            }
                        };
                        drop(permit);
                        report
                    }
                    None => JobReport::lost(&job_id, CANCELLED.to_string()),
                };

                if tx.send((index, report)).await.is_err() {
                    log::warn!("[{}] Run summary closed before the job reported", job_id);
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<JobReport>> = job_ids.iter().map(|_| None).collect();
        while let Some((index, report)) = rx.recv().await {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(report);
            }
        }

        let jobs = slots
            .into_iter()
            .zip(&job_ids)
            .map(|(slot, id)| {
                slot.unwrap_or_else(|| JobReport::lost(id, "worker exited without reporting".into()))
            })
            .collect();

        // Only an emptied work root goes; it may be a caller-owned directory
        if !self.options.keep_work_dir {
            if let Err(e) = tokio::fs::remove_dir(&self.options.work_root).await {
                log::debug!(
                    "Leaving work root {}: {}",
                    self.options.work_root.display(),
                    e
                );
            }
        }

        RunSummary {
            project: ctx.project,
            channel: ctx.channel,
            tag: ctx.tag.to_string(),
            started_at,
            finished_at: Utc::now(),
            jobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::state::Stage;

    fn report(job_id: &str, state: JobState) -> JobReport {
        JobReport {
            job_id: job_id.to_string(),
            state,
            history: Vec::new(),
            duration_ms: 0,
            published: None,
        }
    }

    fn summary(jobs: Vec<JobReport>) -> RunSummary {
        RunSummary {
            project: "qsv".into(),
            channel: "nightly".into(),
            tag: "v1.2.0".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            jobs,
        }
    }

    #[test]
    fn all_published_exits_zero() {
        let s = summary(vec![report("a", JobState::Published), report("b", JobState::Published)]);
        assert!(s.is_success());
        assert_eq!(s.exit_code(), 0);
        assert_eq!(s.published_count(), 2);
    }

    #[test]
    fn blocked_and_failed_jobs_exit_one() {
        let s = summary(vec![
            report("a", JobState::Published),
            report(
                "b",
                JobState::Blocked {
                    reason: "no musl-gcc".into(),
                },
            ),
            report(
                "c",
                JobState::Failed {
                    stage: Stage::Build,
                    reason: "error[E0308]".into(),
                },
            ),
        ]);
        assert!(!s.is_success());
        assert_eq!(s.exit_code(), 1);
        assert_eq!(s.blocked_count(), 1);
        assert_eq!(s.failed_count(), 1);
        assert!(s.job("c").is_some());
    }

    #[test]
    fn lost_worker_is_reported_failed() {
        let r = JobReport::lost("x86_64-apple-darwin", "worker panicked".into());
        assert!(matches!(r.state, JobState::Failed { .. }));
        assert_eq!(r.history.first(), Some(&JobState::Pending));
    }

    #[test]
    fn summary_serializes_states_with_tags() {
        let s = summary(vec![report(
            "a",
            JobState::Failed {
                stage: Stage::Merge,
                reason: "corrupt".into(),
            },
        )]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["jobs"][0]["state"]["state"], "failed");
        assert_eq!(json["jobs"][0]["state"]["stage"], "merge");
    }
}
