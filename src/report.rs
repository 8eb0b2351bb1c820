//! Process reports - serializable snapshots of handles

use crate::core::ProcessState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot of one process handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub id: Uuid,
    pub command: String,
    pub state: ProcessState,
    pub scheduled_at: DateTime<Utc>,
    pub began_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl ProcessReport {
    /// Time between scheduling and launch, once launched
    pub fn queued_for(&self) -> Option<chrono::Duration> {
        self.began_at.map(|began| began - self.scheduled_at)
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Render reports as pretty JSON
pub fn to_json(reports: &[ProcessReport]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(reports)
}
