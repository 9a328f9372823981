//! Grouped running totals built fresh on every aggregation pass

use crate::models::{
    root_path, FlatMetric, JobRecord, MetricList, ALL, METRIC_PATH_NAMESPACES, METRIC_SEPARATOR,
};
use std::collections::BTreeMap;

/// Path segment for a namespace literally named `all`. Namespace names are DNS
/// labels, so the underscore keeps it clear of every real namespace.
pub const ALL_NAMESPACE_SEGMENT: &str = "all_ns";

/// Aggregation bucket identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    /// The whole cluster
    Global,
    Namespace(String),
}

impl GroupKey {
    /// Display name: `all` for the cluster, otherwise the namespace
    pub fn name(&self) -> &str {
        match self {
            GroupKey::Global => ALL,
            GroupKey::Namespace(ns) => ns,
        }
    }

    /// Path segment for this group, unique across groups
    pub fn segment(&self) -> &str {
        match self {
            GroupKey::Namespace(ns) if ns == ALL => ALL_NAMESPACE_SEGMENT,
            other => other.name(),
        }
    }
}

/// Running totals for one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub namespace: String,
    /// Parent path of every metric emitted for this bucket, separator-terminated
    pub path: String,
    pub job_count: i64,
    pub active_count: i64,
    pub success_count: i64,
    pub failed_count: i64,
    /// Whole seconds, each record truncated before summing
    pub duration: i64,
}

/// Metric name and accessor for every numeric field of [`JobSummary`]
const SUMMARY_FIELDS: &[(&str, fn(&JobSummary) -> i64)] = &[
    ("JobCount", |s: &JobSummary| s.job_count),
    ("ActiveCount", |s: &JobSummary| s.active_count),
    ("SuccessCount", |s: &JobSummary| s.success_count),
    ("FailedCount", |s: &JobSummary| s.failed_count),
    ("Duration", |s: &JobSummary| s.duration),
];

impl JobSummary {
    pub fn new(tier_name: &str, group: &GroupKey) -> Self {
        let path = format!(
            "{}{}{}{}{}",
            root_path(tier_name),
            METRIC_PATH_NAMESPACES,
            METRIC_SEPARATOR,
            group.segment(),
            METRIC_SEPARATOR
        );
        Self {
            namespace: group.name().to_string(),
            path,
            job_count: 0,
            active_count: 0,
            success_count: 0,
            failed_count: 0,
            duration: 0,
        }
    }

    /// Fold one record into the running totals
    pub fn add(&mut self, record: &JobRecord) {
        self.job_count += 1;
        self.active_count += i64::from(record.active);
        self.success_count += i64::from(record.success);
        self.failed_count += i64::from(record.failed);
        self.duration += record.duration as i64;
    }

    /// One observation metric per numeric field
    pub fn metrics(&self) -> impl Iterator<Item = FlatMetric> + '_ {
        SUMMARY_FIELDS
            .iter()
            .map(move |(name, get)| FlatMetric::observation(name, get(self), &self.path))
    }
}

/// All buckets of one aggregation pass: the cluster plus one per namespace.
///
/// The cluster bucket and the fallback namespace bucket always exist, so an
/// empty cluster still reports zeros.
#[derive(Debug, Clone)]
pub struct SummarySet {
    tier_name: String,
    buckets: BTreeMap<GroupKey, JobSummary>,
}

impl SummarySet {
    pub fn new(tier_name: impl Into<String>, default_namespace: &str) -> Self {
        let tier_name = tier_name.into();
        let mut buckets = BTreeMap::new();
        for group in [
            GroupKey::Global,
            GroupKey::Namespace(default_namespace.to_string()),
        ] {
            buckets.insert(group.clone(), JobSummary::new(&tier_name, &group));
        }
        Self { tier_name, buckets }
    }

    /// Add a record to the cluster bucket and to its namespace bucket
    pub fn fold(&mut self, record: &JobRecord) {
        let tier_name = &self.tier_name;
        self.buckets
            .entry(GroupKey::Global)
            .or_insert_with(|| JobSummary::new(tier_name, &GroupKey::Global))
            .add(record);

        let group = GroupKey::Namespace(record.namespace.clone());
        self.buckets
            .entry(group.clone())
            .or_insert_with(|| JobSummary::new(tier_name, &group))
            .add(record);
    }

    pub fn global(&self) -> Option<&JobSummary> {
        self.buckets.get(&GroupKey::Global)
    }

    pub fn namespace(&self, namespace: &str) -> Option<&JobSummary> {
        self.buckets.get(&GroupKey::Namespace(namespace.to_string()))
    }

    /// Per-namespace buckets, excluding the cluster bucket
    pub fn namespaces(&self) -> impl Iterator<Item = &JobSummary> {
        self.buckets
            .iter()
            .filter(|(k, _)| matches!(k, GroupKey::Namespace(_)))
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Consume the pass and flatten every bucket into metrics
    pub fn into_metrics(self) -> MetricList {
        let items = self
            .buckets
            .values()
            .flat_map(|summary| summary.metrics())
            .collect();
        MetricList { items }
    }
}
