//! Core data models for the job agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Group identifier used for the cluster-wide summary
pub const ALL: &str = "all";

/// Separator between metric path segments
pub const METRIC_SEPARATOR: &str = "|";

/// Grouping segment for per-namespace summaries
pub const METRIC_PATH_NAMESPACES: &str = "Namespaces";

/// Root of every metric path for the given tier
pub fn root_path(tier_name: &str) -> String {
    format!("Server|Component:{}|Custom Metrics|Cluster Stats|", tier_name)
}

/// Flattened view of a batch Job, as posted to the events API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub cluster_name: String,
    pub namespace: String,
    pub name: String,
    /// `key:value;` pairs in key order
    pub labels: String,
    /// `key:value;` pairs in key order
    pub annotations: String,
    pub active: i32,
    pub success: i32,
    pub failed: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between start and completion, or start and now while running
    pub duration: f64,
    pub active_deadline_seconds: i64,
    pub completions: i32,
    pub backoff_limit: i32,
    pub parallelism: i32,
}

impl JobRecord {
    /// Queue key for this record (`namespace/name`)
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A record waiting in the event queue.
///
/// Identity is the job key only: a job that is already pending keeps its
/// place in the queue and the queue swaps in the newer record.
#[derive(Debug, Clone)]
pub struct QueuedRecord {
    pub key: String,
    pub record: JobRecord,
}

impl QueuedRecord {
    pub fn new(record: JobRecord) -> Self {
        Self {
            key: record.key(),
            record,
        }
    }
}

impl PartialEq for QueuedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueuedRecord {}

impl Hash for QueuedRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// How the controller aggregates successive values of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationType {
    /// Point-in-time value, not a cumulative delta
    Observation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeRollup {
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterRollup {
    Individual,
}

/// A single named value with its full hierarchical path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatMetric {
    pub name: String,
    pub value: i64,
    pub path: String,
    pub aggregation: AggregationType,
    pub time_rollup: TimeRollup,
    pub cluster_rollup: ClusterRollup,
}

impl FlatMetric {
    /// Create an observation metric; `parent_path` must end with the separator
    pub fn observation(name: &str, value: i64, parent_path: &str) -> Self {
        Self {
            name: name.to_string(),
            value,
            path: format!("{}{}", parent_path, name),
            aggregation: AggregationType::Observation,
            time_rollup: TimeRollup::Current,
            cluster_rollup: ClusterRollup::Individual,
        }
    }
}

impl std::fmt::Display for FlatMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Name: {}, Value: {}, Path: {}",
            self.name, self.value, self.path
        )
    }
}

/// Metrics submitted to the metrics sink in one call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricList {
    pub items: Vec<FlatMetric>,
}

impl MetricList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up a metric by its full path
    pub fn find(&self, path: &str) -> Option<&FlatMetric> {
        self.items.iter().find(|m| m.path == path)
    }
}

/// Field name and events API type for every column of [`JobRecord`]
const JOB_SCHEMA_FIELDS: &[(&str, &str)] = &[
    ("clusterName", "string"),
    ("namespace", "string"),
    ("name", "string"),
    ("labels", "string"),
    ("annotations", "string"),
    ("active", "integer"),
    ("success", "integer"),
    ("failed", "integer"),
    ("startTime", "date"),
    ("endTime", "date"),
    ("duration", "float"),
    ("activeDeadlineSeconds", "integer"),
    ("completions", "integer"),
    ("backoffLimit", "integer"),
    ("parallelism", "integer"),
];

/// Structural declaration of the job record, independent of any data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSchemaDefinition {
    pub schema: BTreeMap<&'static str, &'static str>,
}

impl JobSchemaDefinition {
    pub fn new() -> Self {
        Self {
            schema: JOB_SCHEMA_FIELDS.iter().copied().collect(),
        }
    }
}

impl Default for JobSchemaDefinition {
    fn default() -> Self {
        Self::new()
    }
}
