//! Aggregation pass tests against an in-memory metrics sink

use super::*;
use crate::error::AgentError;
use crate::models::MetricList;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::runtime::watcher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const ROOT: &str = "Server|Component:ClusterAgent|Custom Metrics|Cluster Stats|Namespaces|";

#[derive(Default)]
struct RecordingSink {
    posts: Mutex<Vec<MetricList>>,
    calls: AtomicUsize,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn last(&self) -> MetricList {
        self.posts.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn post_metrics(&self, metrics: &MetricList) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AgentError::Backend {
                operation: "metric submission",
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.posts.lock().unwrap().push(metrics.clone());
        Ok(())
    }
}

fn job(namespace: &str, name: &str, active: i32, succeeded: i32, failed: i32) -> Job {
    let start = Utc::now() - ChronoDuration::seconds(120);
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        status: Some(JobStatus {
            active: Some(active),
            succeeded: Some(succeeded),
            failed: Some(failed),
            start_time: Some(Time(start)),
            completion_time: (active == 0).then(|| Time(start + ChronoDuration::seconds(30))),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn synced_cache(jobs: Vec<Job>) -> Arc<JobCache> {
    let cache = Arc::new(JobCache::with_logging_notifier());
    cache.apply(watcher::Event::Restarted(jobs));
    cache
}

fn scenario_cache() -> Arc<JobCache> {
    synced_cache(vec![
        job("a", "ingest", 1, 0, 0),
        job("a", "report", 0, 1, 0),
        job("b", "train", 2, 0, 1),
    ])
}

fn aggregator(cache: Arc<JobCache>, sink: Arc<RecordingSink>) -> MetricsAggregator {
    MetricsAggregator::new(
        cache,
        sink,
        AggregatorConfig {
            cluster_name: "prod".to_string(),
            ..Default::default()
        },
    )
}

fn value(list: &MetricList, group: &str, field: &str) -> i64 {
    let path = format!("{}{}|{}", ROOT, group, field);
    list.find(&path)
        .unwrap_or_else(|| panic!("missing metric {}", path))
        .value
}

#[tokio::test]
async fn test_three_jobs_two_namespaces() {
    let sink = Arc::new(RecordingSink::default());
    let report = aggregator(scenario_cache(), sink.clone())
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.jobs, 3);
    let list = sink.last();

    assert_eq!(value(&list, "all", "JobCount"), 3);
    assert_eq!(value(&list, "all", "ActiveCount"), 3);
    assert_eq!(value(&list, "all", "SuccessCount"), 1);
    assert_eq!(value(&list, "all", "FailedCount"), 1);

    assert_eq!(value(&list, "a", "JobCount"), 2);
    assert_eq!(value(&list, "a", "ActiveCount"), 1);
    assert_eq!(value(&list, "a", "SuccessCount"), 1);
    assert_eq!(value(&list, "a", "FailedCount"), 0);

    assert_eq!(value(&list, "b", "JobCount"), 1);
    assert_eq!(value(&list, "b", "ActiveCount"), 2);
    assert_eq!(value(&list, "b", "FailedCount"), 1);

    // all, default, a, b with five fields each
    assert_eq!(report.metrics, 20);
    assert_eq!(list.len(), 20);
}

#[test]
fn test_namespace_totals_match_cluster_totals() {
    let sink = Arc::new(RecordingSink::default());
    let summaries = aggregator(scenario_cache(), sink).summarize(Utc::now());

    let global = summaries.global().unwrap().clone();
    let mut totals = JobSummary::new("ClusterAgent", &GroupKey::Global);
    for ns in summaries.namespaces() {
        totals.job_count += ns.job_count;
        totals.active_count += ns.active_count;
        totals.success_count += ns.success_count;
        totals.failed_count += ns.failed_count;
        totals.duration += ns.duration;
    }

    assert_eq!(totals, global);
}

#[tokio::test]
async fn test_completed_job_duration_is_exact() {
    let sink = Arc::new(RecordingSink::default());
    let cache = synced_cache(vec![job("a", "done", 0, 1, 0), job("a", "also-done", 0, 1, 0)]);

    aggregator(cache, sink.clone()).run_once().await.unwrap();

    assert_eq!(value(&sink.last(), "a", "Duration"), 60);
}

#[tokio::test]
async fn test_repeated_passes_do_not_accumulate() {
    let sink = Arc::new(RecordingSink::default());
    let cache = synced_cache(vec![job("a", "done", 0, 1, 0), job("b", "failed", 0, 0, 3)]);
    let aggregator = aggregator(cache, sink.clone());

    aggregator.run_once().await.unwrap();
    aggregator.run_once().await.unwrap();

    let posts = sink.posts.lock().unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0], posts[1]);
}

#[tokio::test]
async fn test_empty_cache_reports_zeroed_buckets() {
    let sink = Arc::new(RecordingSink::default());
    let report = aggregator(synced_cache(Vec::new()), sink.clone())
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.jobs, 0);
    let list = sink.last();
    assert_eq!(list.len(), 10);
    assert!(list.items.iter().all(|m| m.value == 0));
    assert_eq!(value(&list, "all", "JobCount"), 0);
    assert_eq!(value(&list, "default", "JobCount"), 0);
}

#[tokio::test]
async fn test_job_without_namespace_counts_in_default_bucket() {
    let sink = Arc::new(RecordingSink::default());
    let mut orphan = job("", "orphan", 1, 0, 0);
    orphan.metadata.namespace = None;

    aggregator(synced_cache(vec![orphan]), sink.clone())
        .run_once()
        .await
        .unwrap();

    assert_eq!(value(&sink.last(), "default", "JobCount"), 1);
}

#[tokio::test]
async fn test_pass_enqueues_each_job_once() {
    let sink = Arc::new(RecordingSink::default());
    let queue = Arc::new(RateLimitingQueue::with_default_rate_limiter());
    let aggregator = aggregator(scenario_cache(), sink).with_queue(queue.clone());

    aggregator.run_once().await.unwrap();
    assert_eq!(queue.len(), 3);

    // Jobs still pending from the previous pass are not queued twice
    aggregator.run_once().await.unwrap();
    assert_eq!(queue.len(), 3);

    let first = queue.get().await.unwrap();
    assert_eq!(first.record.cluster_name, "prod");
    assert!(first.key.contains('/'));
}

#[tokio::test]
async fn test_pending_record_refreshed_by_next_pass() {
    let sink = Arc::new(RecordingSink::default());
    let queue = Arc::new(RateLimitingQueue::with_default_rate_limiter());
    let cache = synced_cache(vec![job("a", "j", 1, 0, 0)]);
    let aggregator = aggregator(cache.clone(), sink).with_queue(queue.clone());

    aggregator.run_once().await.unwrap();
    cache.apply(watcher::Event::Applied(job("a", "j", 0, 1, 0)));
    aggregator.run_once().await.unwrap();

    assert_eq!(queue.len(), 1);
    let queued = queue.get().await.unwrap();
    assert_eq!(queued.key, "a/j");
    assert_eq!(queued.record.active, 0);
    assert_eq!(queued.record.success, 1);
    assert!(queued.record.end_time.is_some());
}

#[tokio::test]
async fn test_sink_failure_is_reported() {
    let sink = Arc::new(RecordingSink::failing());
    let err = aggregator(scenario_cache(), sink.clone())
        .run_once()
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Backend { status: 503, .. }));
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_loop_waits_one_interval_then_stops() {
    let sink = Arc::new(RecordingSink::default());
    let health = HealthRegistry::new();
    health.register(components::AGGREGATOR).await;

    let aggregator = aggregator(scenario_cache(), sink.clone()).with_health(health.clone());
    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(aggregator.run(rx));

    tokio::time::sleep(Duration::from_secs(44)).await;
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

    tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_loop_degrades_health_on_failure() {
    let sink = Arc::new(RecordingSink::failing());
    let health = HealthRegistry::new();
    health.register(components::AGGREGATOR).await;

    let aggregator = aggregator(scenario_cache(), sink).with_health(health.clone());
    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(aggregator.run(rx));

    tokio::time::sleep(Duration::from_secs(46)).await;
    let status = health.health().await.components[components::AGGREGATOR].status;
    assert_eq!(status, crate::health::ComponentStatus::Degraded);

    tx.send(()).unwrap();
    handle.await.unwrap();
}
