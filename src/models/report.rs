//! Inspection records and generated reports as returned by the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub technician_id: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub title: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Generated inspection report. Never mutated; a regeneration replaces it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub inspection_id: String,
    pub generated_at: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub safety_summary: Vec<String>,
    #[serde(default)]
    pub workflow_summary: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub image_count: u32,
    #[serde(default)]
    pub summary_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowActionResult {
    pub status: String,
    pub result_message: String,
    #[serde(default)]
    pub external_reference_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tolerates_missing_optional_sections() {
        let raw = r#"{
            "inspectionId": "insp-1",
            "generatedAt": "2024-05-01T10:00:00Z",
            "status": "final",
            "findings": [{"title": "Corroded flange", "severity": "high"}],
            "imageCount": 3
        }"#;

        let report: Report = serde_json::from_str(raw).unwrap();
        assert_eq!(report.inspection_id, "insp-1");
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].severity.as_deref(), Some("high"));
        assert!(report.safety_summary.is_empty());
        assert_eq!(report.image_count, 3);
        assert_eq!(report.summary_text, "");
    }
}
