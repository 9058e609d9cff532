//! Asynchronous job bookkeeping
//!
//! Commands that run in the background are submitted here. Ids are
//! monotone; cancellation is cooperative through a token the scan engine
//! polls between fetch batches and between partitions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where a job currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Finished,
    CancelRequested,
}

/// One submitted job.
pub struct Job {
    pub id: usize,
    pub label: String,
    pub started: DateTime<Utc>,
    pub cancel: CancellationToken,
    handle: JoinHandle<()>,
    cancel_requested: bool,
}

impl Job {
    pub fn state(&self) -> JobState {
        if self.handle.is_finished() {
            JobState::Finished
        } else if self.cancel_requested {
            JobState::CancelRequested
        } else {
            JobState::Running
        }
    }
}

/// A one-line status snapshot for `jobs`.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub id: usize,
    pub label: String,
    pub started: DateTime<Utc>,
    pub state: JobState,
}

/// Tracks asynchronous jobs spawned by commands.
///
/// The table sits behind a single mutex; handlers only touch it from
/// short, non-blocking sections.
#[derive(Default)]
pub struct JobManager {
    next_id: AtomicUsize,
    jobs: Mutex<HashMap<usize, Job>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a running task under a fresh id and returns the id.
    pub fn submit(
        &self,
        label: impl Into<String>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    ) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            id,
            label: label.into(),
            started: Utc::now(),
            cancel,
            handle,
            cancel_requested: false,
        };
        self.jobs.lock().insert(id, job);
        id
    }

    /// Status of all known jobs, oldest first.
    pub fn list(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.lock();
        let mut statuses: Vec<JobStatus> = jobs
            .values()
            .map(|job| JobStatus {
                id: job.id,
                label: job.label.clone(),
                started: job.started,
                state: job.state(),
            })
            .collect();
        statuses.sort_by_key(|status| status.id);
        statuses
    }

    /// Status of one job.
    pub fn get(&self, id: usize) -> Option<JobStatus> {
        self.jobs.lock().get(&id).map(|job| JobStatus {
            id: job.id,
            label: job.label.clone(),
            started: job.started,
            state: job.state(),
        })
    }

    /// Requests cooperative cancellation; returns false for an unknown
    /// id.
    pub fn cancel(&self, id: usize) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id) {
            Some(job) => {
                job.cancel_requested = true;
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Drops finished jobs from the table, returning how many were
    /// removed.
    pub fn reap(&self) -> usize {
        let mut jobs = self.jobs.lock();
        let finished: Vec<usize> = jobs
            .iter()
            .filter(|(_, job)| job.state() == JobState::Finished)
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            jobs.remove(id);
        }
        finished.len()
    }

    /// Cancels everything; called at shutdown.
    pub fn cancel_all(&self) {
        for job in self.jobs.lock().values_mut() {
            job.cancel_requested = true;
            job.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_monotone_and_listing_is_ordered() {
        let manager = JobManager::new();
        let first = manager.submit("a", CancellationToken::new(), tokio::spawn(async {}));
        let second = manager.submit("b", CancellationToken::new(), tokio::spawn(async {}));
        assert!(second > first);
        let listed = manager.list();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].id < listed[1].id);
    }

    #[tokio::test]
    async fn cancel_flags_the_job_and_fires_the_token() {
        let manager = JobManager::new();
        let token = CancellationToken::new();
        let watched = token.clone();
        let handle = tokio::spawn(async move {
            watched.cancelled().await;
        });
        let id = manager.submit("scan", token, handle);
        assert!(manager.cancel(id));
        assert!(!manager.cancel(id + 100));
        // the task exits once the token fires
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                if manager.get(id).map(|s| s.state) == Some(JobState::Finished) {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job should finish after cancellation");
    }

    #[tokio::test]
    async fn reap_drops_finished_jobs() {
        let manager = JobManager::new();
        let handle = tokio::spawn(async {});
        let id = manager.submit("done", CancellationToken::new(), handle);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(manager.reap(), 1);
        assert!(manager.get(id).is_none());
    }
}
