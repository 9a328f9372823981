//! Observer hooks invoked by the job cache on every change

use k8s_openapi::api::batch::v1::Job;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

use super::job_key;

/// Receives add/update/delete notifications from the job cache.
///
/// Hooks run synchronously on the watch task, so they must stay cheap.
pub trait ChangeNotifier: Send + Sync {
    fn on_add(&self, job: &Job);

    fn on_update(&self, old: &Job, new: &Job);

    fn on_delete(&self, job: &Job);
}

/// Notifier that only logs the affected job
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

impl ChangeNotifier for LoggingNotifier {
    fn on_add(&self, job: &Job) {
        debug!(job = %job_key(job), "Added job");
    }

    fn on_update(&self, _old: &Job, new: &Job) {
        debug!(job = %job_key(new), "Updated job");
    }

    fn on_delete(&self, job: &Job) {
        debug!(job = %job_key(job), "Deleted job");
    }
}

/// Kind of change delivered to a notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    Added,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

/// Run a notifier hook, containing any panic so the watch loop survives it
pub(crate) fn notify_guarded<F>(kind: ChangeKind, key: &str, hook: F)
where
    F: FnOnce(),
{
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        error!(
            job = %key,
            change = kind.as_str(),
            "Change notifier panicked, continuing watch"
        );
    }
}
