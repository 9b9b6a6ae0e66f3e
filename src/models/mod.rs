//! Core data models for the feedpipe import engine
//!
//! Everything the engine persists or threads through a run lives here:
//! pipeline configurations, execution records, filter and mapping rules,
//! and the fixed stage ordering. Rows are dynamic JSON objects because the
//! engine imports arbitrary third-party feeds whose shape is only known at
//! configuration time.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A single imported record: field name -> JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// The unified options bag shared by all plugins of a pipeline
pub type OptionBag = serde_json::Map<String, serde_json::Value>;

/// Fixed, ordered pipeline stages
///
/// The declared order integer determines prefix length for partial
/// execution: requesting `Stage::Filter` runs Download, Read and Filter
/// and nothing after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Read,
    Filter,
    Map,
    ImagesPrepare,
    Prepare,
    Save,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 7] = [
        Stage::Download,
        Stage::Read,
        Stage::Filter,
        Stage::Map,
        Stage::ImagesPrepare,
        Stage::Prepare,
        Stage::Save,
    ];

    /// 1-based position in the pipe chain
    pub fn order(&self) -> u8 {
        match self {
            Stage::Download => 1,
            Stage::Read => 2,
            Stage::Filter => 3,
            Stage::Map => 4,
            Stage::ImagesPrepare => 5,
            Stage::Prepare => 6,
            Stage::Save => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Read => "read",
            Stage::Filter => "filter",
            Stage::Map => "map",
            Stage::ImagesPrepare => "images_prepare",
            Stage::Prepare => "prepare",
            Stage::Save => "save",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source descriptor: where and how to fetch raw content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Unified options bag, shared with every plugin in the run
    #[serde(default)]
    pub options: OptionBag,
}

fn default_method() -> String {
    "GET".to_string()
}

impl SourceConfig {
    /// URL scheme, lowercased; selects the downloader plugin
    pub fn scheme(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .map(|u| u.scheme().to_ascii_lowercase())
    }
}

/// Reader descriptor: which format parser to apply and its options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub reader_type: String,
    #[serde(default)]
    pub options: OptionBag,
}

/// One filter rule: `{ key, operator, value, options }`
///
/// `key` is a dot-path into the row (`attributes.color`), `operator` names
/// a registered predicate, `value` is the comparison operand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub key: String,
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub options: OptionBag,
}

/// An explicit from -> to value substitution pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueMapping {
    pub from: serde_json::Value,
    pub to: serde_json::Value,
}

/// One field-mapping rule applied per row by the mapper stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRule {
    pub source_field: String,
    pub target_field: String,
    #[serde(default = "default_transformation")]
    pub transformation: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(default)]
    pub format: Option<String>,
    /// Explicit value substitution table, applied after the transformation
    #[serde(default)]
    pub value_mapping: Vec<ValueMapping>,
}

fn default_transformation() -> String {
    "none".to_string()
}

/// Image handling options for the images-prepare stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageOptions {
    #[serde(default)]
    pub enabled: bool,
    /// Row fields holding image URLs
    #[serde(default)]
    pub fields: Vec<String>,
}

/// How often a pipeline is due
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Frequency {
    Daily,
    Hourly,
    /// Every N hours, N taken from config when absent
    CustomInterval(u32),
    /// Full cron expression (seconds field included)
    Cron(String),
}

/// Scheduling attributes of a pipeline
///
/// `last_executed_at` and `next_execution_at` are the only fields the
/// engine mutates; everything else is owned by the configuration wizard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub frequency: Frequency,
    /// Wall-clock start time for daily/interval schedules
    pub start_time: NaiveTime,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_execution_at: Option<DateTime<Utc>>,
}

/// A named, organization-scoped import configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub source: SourceConfig,
    pub reader: ReaderConfig,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
    #[serde(default)]
    pub images: ImageOptions,
    /// Optional business resolver applied after mapping
    #[serde(default)]
    pub resolver: Option<String>,
    pub schedule: ScheduleConfig,
    /// Free-form nested settings (passed to the resolver verbatim)
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Execution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What triggered a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Scheduler,
    Manual,
}

/// Row counts recorded on a completed execution
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub read: usize,
    pub filtered: usize,
    pub mapped: usize,
    pub saved: usize,
}

/// One historical run of a pipeline
///
/// Created at run start, mutated only by the execution service, immutable
/// once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub pipeline_id: i64,
    pub status: ExecutionStatus,
    pub triggered_by: TriggeredBy,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub counts: ExecutionCounts,
    pub error_message: Option<String>,
    pub error_stage: Option<Stage>,
}

impl Execution {
    pub fn new(pipeline_id: i64, triggered_by: TriggeredBy) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            status: ExecutionStatus::Pending,
            triggered_by,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            counts: ExecutionCounts::default(),
            error_message: None,
            error_stage: None,
        }
    }
}

/// Persisted output of a completed run's save stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub organization_id: i64,
    pub pipeline_id: i64,
    pub execution_id: Uuid,
    pub rows: Vec<Row>,
    pub saved_at: DateTime<Utc>,
}
