//! Status tracking for background batches.
//!
//! Each job kind owns one [`JobTracker`]. A batch claims the tracker with
//! [`JobTracker::try_start`] and gets a [`JobRun`]; while that run is alive any
//! further start attempt fails with [`JobError::AlreadyRunning`]. The run
//! appends one [`JobEntry`] per processed subject and completes the tracker
//! when finished or dropped.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Result entries kept per tracker; older ones are discarded
pub const DEFAULT_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    FeedRefresh,
    RatingBackfill,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::FeedRefresh => write!(f, "feed refresh"),
            JobKind::RatingBackfill => write!(f, "rating backfill"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Complete,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("A {0} is already running")]
    AlreadyRunning(JobKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    Success,
    NotFound,
    Failed,
}

/// Outcome of one subject (performer or title) within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEntry {
    pub subject: String,
    pub outcome: EntryOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retries: u32,
    pub at: i64,
}

impl JobEntry {
    fn new(subject: impl Into<String>, outcome: EntryOutcome) -> Self {
        Self {
            subject: subject.into(),
            outcome,
            added: None,
            rating: None,
            error: None,
            retries: 0,
            at: crate::util::now_ts(),
        }
    }

    pub fn success(subject: impl Into<String>) -> Self {
        Self::new(subject, EntryOutcome::Success)
    }

    pub fn not_found(subject: impl Into<String>) -> Self {
        Self::new(subject, EntryOutcome::NotFound)
    }

    pub fn failed(subject: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(subject, EntryOutcome::Failed)
        }
    }

    pub fn with_added(mut self, added: usize) -> Self {
        self.added = Some(added);
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    /// Subjects the run intends to process, when known up front
    pub planned: usize,
    pub total: usize,
    pub success: usize,
    pub not_found: usize,
    pub failed: usize,
}

impl JobSummary {
    fn count(&mut self, outcome: EntryOutcome) {
        self.total += 1;
        match outcome {
            EntryOutcome::Success => self.success += 1,
            EntryOutcome::NotFound => self.not_found += 1,
            EntryOutcome::Failed => self.failed += 1,
        }
    }
}

/// Point-in-time copy of a tracker's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub kind: JobKind,
    pub status: JobStatus,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub summary: JobSummary,
    /// Most recent entries, oldest first
    pub entries: Vec<JobEntry>,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    summary: JobSummary,
    entries: VecDeque<JobEntry>,
}

#[derive(Debug)]
pub struct JobTracker {
    kind: JobKind,
    capacity: usize,
    state: Mutex<JobState>,
}

impl JobTracker {
    pub fn new(kind: JobKind) -> Self {
        Self::with_capacity(kind, DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(kind: JobKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
            state: Mutex::new(JobState {
                status: JobStatus::Idle,
                started_at: None,
                finished_at: None,
                summary: JobSummary::default(),
                entries: VecDeque::new(),
            }),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    // A panicking holder cannot leave the state half-written: every critical
    // section is a handful of field assignments.
    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the tracker for a new run, resetting the previous run's results
    pub fn try_start(self: &Arc<Self>) -> Result<JobRun, JobError> {
        let mut state = self.lock();
        if state.status == JobStatus::Running {
            return Err(JobError::AlreadyRunning(self.kind));
        }

        state.status = JobStatus::Running;
        state.started_at = Some(crate::util::now_ts());
        state.finished_at = None;
        state.summary = JobSummary::default();
        state.entries.clear();
        drop(state);

        tracing::info!(job = %self.kind, "Job started");
        Ok(JobRun {
            tracker: Arc::clone(self),
            finished: false,
        })
    }

    pub fn is_running(&self) -> bool {
        self.lock().status == JobStatus::Running
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.lock();
        JobSnapshot {
            kind: self.kind,
            status: state.status,
            started_at: state.started_at,
            finished_at: state.finished_at,
            summary: state.summary.clone(),
            entries: state.entries.iter().cloned().collect(),
        }
    }
}

/// Exclusive handle on a running job. Dropping it completes the job.
#[derive(Debug)]
pub struct JobRun {
    tracker: Arc<JobTracker>,
    finished: bool,
}

impl JobRun {
    pub fn kind(&self) -> JobKind {
        self.tracker.kind
    }

    /// Announce how many subjects the run will process
    pub fn plan(&self, planned: usize) {
        self.tracker.lock().summary.planned = planned;
    }

    pub fn record(&self, entry: JobEntry) {
        let mut state = self.tracker.lock();
        state.summary.count(entry.outcome);
        if state.entries.len() >= self.tracker.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(entry);
    }

    /// Mark the job complete and return its final counts
    pub fn finish(mut self) -> JobSummary {
        self.complete()
    }

    fn complete(&mut self) -> JobSummary {
        self.finished = true;
        let mut state = self.tracker.lock();
        state.status = JobStatus::Complete;
        state.finished_at = Some(crate::util::now_ts());
        let summary = state.summary.clone();
        drop(state);

        tracing::info!(
            job = %self.tracker.kind,
            total = summary.total,
            success = summary.success,
            not_found = summary.not_found,
            failed = summary.failed,
            "Job complete"
        );
        summary
    }
}

impl Drop for JobRun {
    fn drop(&mut self) {
        if !self.finished {
            self.complete();
        }
    }
}
