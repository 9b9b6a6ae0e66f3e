//! Background run dispatch
//!
//! Each pipeline run is one unit of work: queued with a priority lane,
//! executed under a whole-run timeout, retried with fixed backoff. Row
//! failures inside a run are recorded, never retried; retry applies to the
//! run as a whole.

pub mod queue;
pub mod runner;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::TriggeredBy;

pub use queue::JobQueue;
pub use runner::ImportRunner;

/// Queue lane; ordering drives dequeue order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

/// One queued pipeline run
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub pipeline_id: i64,
    pub priority: JobPriority,
    pub triggered_by: TriggeredBy,
    pub queued_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn new(pipeline_id: i64, priority: JobPriority, triggered_by: TriggeredBy) -> Self {
        Self {
            pipeline_id,
            priority,
            triggered_by,
            queued_at: Utc::now(),
        }
    }
}
