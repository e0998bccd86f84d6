//! Per-job state machine.
//!
//! `Pending → [Preparing →] Building → Packaging → Merging → Publishing →
//! Published`. Any running stage may end in `Failed`; a failed prep step ends
//! in `Blocked`. A pending job can only fail by cancellation, which is recorded
//! against the build stage. Terminal states never move again.

use serde::Serialize;
use std::fmt;

/// Pipeline stage a job can fail in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Prep,
    Build,
    Package,
    Merge,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Prep => "prep",
            Stage::Build => "build",
            Stage::Package => "package",
            Stage::Merge => "merge",
            Stage::Publish => "publish",
        })
    }
}

/// State of one build job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Preparing,
    Building,
    Packaging,
    Merging,
    Publishing,
    Published,
    Blocked { reason: String },
    Failed { stage: Stage, reason: String },
}

impl JobState {
    /// Stage this state is running, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            JobState::Preparing => Some(Stage::Prep),
            JobState::Building => Some(Stage::Build),
            JobState::Packaging => Some(Stage::Package),
            JobState::Merging => Some(Stage::Merge),
            JobState::Publishing => Some(Stage::Publish),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Published | JobState::Blocked { .. } | JobState::Failed { .. }
        )
    }

    /// Whether `next` directly follows this state
    pub fn can_advance_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Pending, Preparing | Building) => true,
            (Preparing, Building | Blocked { .. }) => true,
            (Building, Packaging) => true,
            (Packaging, Merging) => true,
            (Merging, Publishing) => true,
            (Publishing, Published) => true,
            (current, Failed { stage, .. }) => {
                !current.is_terminal() && current.stage().unwrap_or(Stage::Build) == *stage
            }
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => f.write_str("pending"),
            JobState::Preparing => f.write_str("preparing"),
            JobState::Building => f.write_str("building"),
            JobState::Packaging => f.write_str("packaging"),
            JobState::Merging => f.write_str("merging"),
            JobState::Publishing => f.write_str("publishing"),
            JobState::Published => f.write_str("published"),
            JobState::Blocked { reason } => write!(f, "blocked: {}", reason),
            JobState::Failed { stage, reason } => write!(f, "failed in {}: {}", stage, reason),
        }
    }
}

/// Illegal state change; indicates a pipeline bug
#[derive(Debug, thiserror::Error)]
#[error("job {job}: illegal transition from {from} to {to}")]
pub struct TransitionError {
    pub job: String,
    pub from: String,
    pub to: String,
}

/// Tracks one job's state and the path it took
#[derive(Debug, Clone)]
pub struct JobTracker {
    job: String,
    current: JobState,
    history: Vec<JobState>,
}

impl JobTracker {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            current: JobState::Pending,
            history: vec![JobState::Pending],
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn current(&self) -> &JobState {
        &self.current
    }

    /// Every state entered, starting with `Pending`
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    /// Moves to `next` if it directly follows the current state
    pub fn advance(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.current.can_advance_to(&next) {
            return Err(TransitionError {
                job: self.job.clone(),
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        log::debug!("[{}] {} -> {}", self.job, self.current, next);
        self.current = next.clone();
        self.history.push(next);
        Ok(())
    }

    /// Ends the job as failed in its current stage
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        let stage = self.current.stage().unwrap_or(Stage::Build);
        self.advance(JobState::Failed {
            stage,
            reason: reason.into(),
        })
    }

    /// Ends the job as blocked by its prep step
    pub fn block(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.advance(JobState::Blocked {
            reason: reason.into(),
        })
    }

    pub fn into_parts(self) -> (JobState, Vec<JobState>) {
        (self.current, self.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_visits_every_stage() {
        let mut tracker = JobTracker::new("x86_64-unknown-linux-gnu");
        for next in [
            JobState::Building,
            JobState::Packaging,
            JobState::Merging,
            JobState::Publishing,
            JobState::Published,
        ] {
            tracker.advance(next).unwrap();
        }
        assert_eq!(tracker.current(), &JobState::Published);
        assert_eq!(tracker.history().len(), 6);
    }

    #[test]
    fn stages_cannot_be_skipped() {
        let mut tracker = JobTracker::new("job");
        tracker.advance(JobState::Building).unwrap();
        assert!(tracker.advance(JobState::Merging).is_err());
        assert!(tracker.advance(JobState::Published).is_err());
        assert_eq!(tracker.current(), &JobState::Building);
    }

    #[test]
    fn failure_records_the_running_stage() {
        let mut tracker = JobTracker::new("job");
        tracker.advance(JobState::Building).unwrap();
        tracker.advance(JobState::Packaging).unwrap();
        tracker.fail("disk full").unwrap();
        assert_eq!(
            tracker.current(),
            &JobState::Failed {
                stage: Stage::Package,
                reason: "disk full".into()
            }
        );
        assert!(tracker.current().is_terminal());
        assert!(tracker.advance(JobState::Merging).is_err());
    }

    #[test]
    fn failed_prep_blocks_the_job() {
        let mut tracker = JobTracker::new("x86_64-unknown-linux-musl");
        tracker.advance(JobState::Preparing).unwrap();
        tracker.block("apt-get exited with 100").unwrap();
        assert!(matches!(tracker.current(), JobState::Blocked { .. }));
        assert!(tracker.advance(JobState::Building).is_err());
    }

    #[test]
    fn only_prep_can_block() {
        let mut tracker = JobTracker::new("job");
        tracker.advance(JobState::Building).unwrap();
        assert!(tracker.block("nope").is_err());
    }

    #[test]
    fn cancelled_pending_job_fails_in_build() {
        let mut tracker = JobTracker::new("job");
        tracker.fail("cancelled").unwrap();
        assert_eq!(
            tracker.current(),
            &JobState::Failed {
                stage: Stage::Build,
                reason: "cancelled".into()
            }
        );
        assert!(tracker.fail("again").is_err());
    }

    #[test]
    fn cancelled_prep_fails_in_prep() {
        let mut tracker = JobTracker::new("job");
        tracker.advance(JobState::Preparing).unwrap();
        tracker.fail("cancelled").unwrap();
        assert!(matches!(
            tracker.current(),
            JobState::Failed {
                stage: Stage::Prep,
                ..
            }
        ));
    }
}
