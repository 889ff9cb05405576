use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::report::RunSummary;

/// One (starting rule, data row) execution queued on the batch runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub id: Uuid,
    pub start_rule: String,
    pub row_index: usize,
    pub created_at: DateTime<Utc>,
}

impl RunRequest {
    pub fn new(start_rule: impl Into<String>, row_index: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_rule: start_rule.into(),
            row_index,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle state of a queued run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// In-memory record tracking one run through the batch runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub request: RunRequest,
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub summary: Option<RunSummary>,
}

impl RunRecord {
    pub fn new(request: RunRequest) -> Self {
        Self {
            request,
            state: RunState::Queued,
            started_at: None,
            finished_at: None,
            last_error: None,
            summary: None,
        }
    }
}
