use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::InspectionId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    CreateInspection,
    UploadSnapshot,
    CompleteInspection,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateInspection => "CreateInspection",
            OperationKind::UploadSnapshot => "UploadSnapshot",
            OperationKind::CompleteInspection => "CompleteInspection",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OperationPayload {
    #[serde(rename_all = "camelCase")]
    CreateInspection {
        technician_id: String,
        site_id: String,
    },
    #[serde(rename_all = "camelCase")]
    UploadSnapshot { frame_data_url: String },
    #[serde(rename_all = "camelCase")]
    CompleteInspection {
        summary: Option<String>,
        /// Set once the backend accepted the completion but report generation
        /// has not succeeded yet.
        #[serde(default)]
        completed: bool,
    },
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::CreateInspection { .. } => OperationKind::CreateInspection,
            OperationPayload::UploadSnapshot { .. } => OperationKind::UploadSnapshot,
            OperationPayload::CompleteInspection { .. } => OperationKind::CompleteInspection,
        }
    }
}

/// A mutation that has not been confirmed by the backend yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub operation_id: String,
    /// Storage order; the queue is drained strictly ascending.
    pub seq: i64,
    pub target: InspectionId,
    pub payload: OperationPayload,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedOperation {
    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }
}

/// Handle returned to the UI for a snapshot that is still waiting in the queue.
pub fn offline_snapshot_ref(operation_id: &str) -> String {
    format!("offline://snapshot/{operation_id}")
}
