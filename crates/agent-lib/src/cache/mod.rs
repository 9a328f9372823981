//! Local, eventually-consistent copy of every batch Job in the cluster
//!
//! The cache is fed by a list-then-watch subscription (see [`JobWatcher`])
//! and hands out point-in-time snapshots to the aggregator. Every change is
//! forwarded to a [`ChangeNotifier`] for observability.

mod notifier;
mod watch;

pub use notifier::{ChangeNotifier, LoggingNotifier};
pub use watch::{JobEventStream, JobWatcher};

use crate::observability::AgentMetrics;
use dashmap::DashMap;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::watcher;
use notifier::{notify_guarded, ChangeKind};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Cache key of a job: `namespace/name`, or `name` for cluster-scoped objects
pub fn job_key(job: &Job) -> String {
    let name = job.metadata.name.as_deref().unwrap_or_default();
    match job.metadata.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

/// Indexed store of live jobs with a "synced" readiness signal
pub struct JobCache {
    /// Map of `namespace/name` -> job
    jobs: DashMap<String, Arc<Job>>,
    /// Set once the initial full list has been indexed
    synced: AtomicBool,
    notifier: Arc<dyn ChangeNotifier>,
    metrics: AgentMetrics,
}

impl JobCache {
    /// Create an empty, unsynced cache
    pub fn new(notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            jobs: DashMap::new(),
            synced: AtomicBool::new(false),
            notifier,
            metrics: AgentMetrics::new(),
        }
    }

    /// Create a cache whose notifier only logs
    pub fn with_logging_notifier() -> Self {
        Self::new(Arc::new(LoggingNotifier))
    }

    /// Snapshot of all known jobs at call time
    pub fn list(&self) -> Vec<Arc<Job>> {
        self.jobs.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Look up a job by its cache key
    pub fn get(&self, key: &str) -> Option<Arc<Job>> {
        self.jobs.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// True once the initial full list has completed and been indexed
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Reduce one watch event into the store
    pub fn apply(&self, event: watcher::Event<Job>) {
        match event {
            watcher::Event::Applied(job) => self.upsert(job),
            watcher::Event::Deleted(job) => self.remove(&job),
            watcher::Event::Restarted(jobs) => self.replace(jobs),
        }
        self.metrics.set_jobs_cached(self.jobs.len() as i64);
    }

    fn upsert(&self, job: Job) {
        let key = job_key(&job);
        let job = Arc::new(job);
        let previous = self.jobs.insert(key.clone(), Arc::clone(&job));

        match previous {
            Some(old) => {
                self.metrics.inc_watch_event(ChangeKind::Updated.as_str());
                notify_guarded(ChangeKind::Updated, &key, || {
                    self.notifier.on_update(&old, &job)
                });
            }
            None => {
                self.metrics.inc_watch_event(ChangeKind::Added.as_str());
                notify_guarded(ChangeKind::Added, &key, || self.notifier.on_add(&job));
            }
        }
    }

    fn remove(&self, job: &Job) {
        let key = job_key(job);
        if self.jobs.remove(&key).is_some() {
            self.metrics.inc_watch_event(ChangeKind::Deleted.as_str());
            notify_guarded(ChangeKind::Deleted, &key, || self.notifier.on_delete(job));
        } else {
            debug!(job = %key, "Delete for unknown job ignored");
        }
    }

    /// Full resync: replace the whole store with a fresh list
    fn replace(&self, jobs: Vec<Job>) {
        let fresh: HashSet<String> = jobs.iter().map(job_key).collect();

        let stale: Vec<String> = self
            .jobs
            .iter()
            .filter(|r| !fresh.contains(r.key()))
            .map(|r| r.key().clone())
            .collect();

        for key in stale {
            if let Some((_, old)) = self.jobs.remove(&key) {
                self.metrics.inc_watch_event(ChangeKind::Deleted.as_str());
                notify_guarded(ChangeKind::Deleted, &key, || self.notifier.on_delete(&old));
            }
        }

        let count = jobs.len();
        for job in jobs {
            self.upsert(job);
        }

        if !self.synced.swap(true, Ordering::AcqRel) {
            info!(jobs = count, "Initial job list indexed");
        } else {
            debug!(jobs = count, "Job list resynced");
        }
    }
}
