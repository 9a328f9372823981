//! Normalization of a batch Job into a flat [`JobRecord`]

use crate::models::JobRecord;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::{debug, warn};

/// Build the flattened record for one job.
///
/// `cluster_name` is used because job metadata carries no cluster identity;
/// `fallback_namespace` applies to objects without a namespace. Spec fields
/// the API server normally defaults are read as zero when absent.
pub fn normalize_job(
    job: &Job,
    cluster_name: &str,
    fallback_namespace: &str,
    now: DateTime<Utc>,
) -> JobRecord {
    let meta = &job.metadata;
    let name = meta.name.clone().unwrap_or_default();
    let namespace = meta
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| fallback_namespace.to_string());

    let status = job.status.clone().unwrap_or_default();
    let start_time = status.start_time.map(|t| t.0);
    let end_time = status.completion_time.map(|t| t.0);

    let duration = match (start_time, end_time) {
        (Some(start), Some(end)) => seconds_between(start, end),
        (Some(start), None) => seconds_between(start, now),
        (None, _) => 0.0,
    };

    let spec = job.spec.clone().unwrap_or_default();
    let mut missing = Vec::new();
    let completions = spec.completions.unwrap_or_else(|| {
        missing.push("completions");
        0
    });
    let backoff_limit = spec.backoff_limit.unwrap_or_else(|| {
        missing.push("backoffLimit");
        0
    });
    let parallelism = spec.parallelism.unwrap_or_else(|| {
        missing.push("parallelism");
        0
    });

    if !missing.is_empty() {
        warn!(
            job = %format!("{}/{}", namespace, name),
            fields = ?missing,
            "Job spec is missing defaulted fields, reporting zero"
        );
    }

    // activeDeadlineSeconds is legitimately unset on most jobs
    let active_deadline_seconds = spec.active_deadline_seconds.unwrap_or_else(|| {
        debug!(job = %name, "No active deadline set");
        0
    });

    JobRecord {
        cluster_name: cluster_name.to_string(),
        namespace,
        name,
        labels: join_pairs(meta.labels.as_ref()),
        annotations: join_pairs(meta.annotations.as_ref()),
        active: status.active.unwrap_or(0),
        success: status.succeeded.unwrap_or(0),
        failed: status.failed.unwrap_or(0),
        start_time,
        end_time,
        duration,
        active_deadline_seconds,
        completions,
        backoff_limit,
        parallelism,
    }
}

/// Seconds elapsed from `start` to `end`, millisecond precision
fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// Render a label or annotation map as `key:value;` pairs
fn join_pairs(pairs: Option<&BTreeMap<String, String>>) -> String {
    let mut out = String::new();
    for (k, v) in pairs.into_iter().flatten() {
        let _ = write!(out, "{}:{};", k, v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use k8s_openapi::api::batch::v1::{JobSpec, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn job_with(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("nightly-report".to_string()),
                namespace: Some("batch".to_string()),
                labels: Some(BTreeMap::from([
                    ("team".to_string(), "data".to_string()),
                    ("app".to_string(), "report".to_string()),
                ])),
                ..Default::default()
            },
            spec: Some(JobSpec {
                active_deadline_seconds: Some(600),
                completions: Some(3),
                backoff_limit: Some(4),
                parallelism: Some(2),
                ..Default::default()
            }),
            status: Some(JobStatus {
                active: Some(1),
                succeeded: Some(2),
                failed: Some(1),
                start_time: start.map(Time),
                completion_time: end.map(Time),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_completed_job_duration_is_exact() {
        let start = t0();
        let end = start + Duration::seconds(95);
        let record = normalize_job(&job_with(Some(start), Some(end)), "prod", "default", Utc::now());

        assert_eq!(record.duration, 95.0);
        assert_eq!(record.start_time, Some(start));
        assert_eq!(record.end_time, Some(end));
    }

    #[test]
    fn test_running_job_duration_uses_now() {
        let start = Utc::now() - Duration::seconds(120);
        let record = normalize_job(&job_with(Some(start), None), "prod", "default", Utc::now());

        assert!(record.end_time.is_none());
        assert!((record.duration - 120.0).abs() < 3.0, "got {}", record.duration);
    }

    #[test]
    fn test_unstarted_job_has_zero_duration() {
        let record = normalize_job(&job_with(None, None), "prod", "default", Utc::now());
        assert_eq!(record.duration, 0.0);
        assert!(record.start_time.is_none());
    }

    #[test]
    fn test_record_fields() {
        let record = normalize_job(&job_with(Some(t0()), None), "prod", "default", t0());

        assert_eq!(record.cluster_name, "prod");
        assert_eq!(record.namespace, "batch");
        assert_eq!(record.name, "nightly-report");
        assert_eq!(record.labels, "app:report;team:data;");
        assert_eq!(record.annotations, "");
        assert_eq!((record.active, record.success, record.failed), (1, 2, 1));
        assert_eq!(record.active_deadline_seconds, 600);
        assert_eq!(record.completions, 3);
        assert_eq!(record.backoff_limit, 4);
        assert_eq!(record.parallelism, 2);
    }

    #[test]
    fn test_absent_spec_and_status_default_to_zero() {
        let job = Job {
            metadata: ObjectMeta {
                name: Some("bare".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let record = normalize_job(&job, "prod", "default", Utc::now());

        assert_eq!(record.namespace, "default");
        assert_eq!(record.active_deadline_seconds, 0);
        assert_eq!(record.completions, 0);
        assert_eq!(record.backoff_limit, 0);
        assert_eq!(record.parallelism, 0);
        assert_eq!((record.active, record.success, record.failed), (0, 0, 0));
    }
}
