use serde::{Deserialize, Serialize};

const LEGACY_PREFIX: &str = "WF_CONFIRM";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl WorkflowStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(WorkflowStatus::Pending),
            "confirmed" => Some(WorkflowStatus::Confirmed),
            "cancelled" => Some(WorkflowStatus::Cancelled),
            "expired" => Some(WorkflowStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Confirmed => "confirmed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfirmation {
    pub status: WorkflowStatus,
    pub action: String,
    pub label: String,
}

/// Parses the legacy `WF_CONFIRM|<status>|<action>|<label...>` transcript
/// convention. Anything else is an ordinary transcript line and yields `None`.
pub fn parse_workflow_confirmation(line: &str) -> Option<WorkflowConfirmation> {
    let mut parts = line.trim().splitn(4, '|');
    if parts.next()? != LEGACY_PREFIX {
        return None;
    }

    let status = WorkflowStatus::parse(parts.next()?.trim())?;
    let action = parts.next()?.trim();
    let label = parts.next()?.trim();
    if action.is_empty() {
        return None;
    }

    Some(WorkflowConfirmation {
        status,
        action: action.to_string(),
        label: label.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pending_confirmation() {
        let parsed =
            parse_workflow_confirmation("WF_CONFIRM|pending|create_ticket|Waiting for approval")
                .unwrap();
        assert_eq!(
            parsed,
            WorkflowConfirmation {
                status: WorkflowStatus::Pending,
                action: "create_ticket".into(),
                label: "Waiting for approval".into(),
            }
        );
    }

    #[test]
    fn too_few_fields_is_plain_text() {
        assert_eq!(parse_workflow_confirmation("WF_CONFIRM|weird"), None);
        assert_eq!(parse_workflow_confirmation("WF_CONFIRM|pending|create_ticket"), None);
    }

    #[test]
    fn unknown_status_is_plain_text() {
        assert_eq!(
            parse_workflow_confirmation("WF_CONFIRM|maybe|create_ticket|Label"),
            None
        );
    }

    #[test]
    fn label_keeps_embedded_pipes() {
        let parsed =
            parse_workflow_confirmation("WF_CONFIRM|confirmed|notify_supervisor|Sent | ref 42")
                .unwrap();
        assert_eq!(parsed.status, WorkflowStatus::Confirmed);
        assert_eq!(parsed.label, "Sent | ref 42");
    }

    #[test]
    fn ordinary_lines_do_not_match() {
        assert_eq!(parse_workflow_confirmation("The valve looks fine"), None);
        assert_eq!(parse_workflow_confirmation("WF_CONFIRMED|pending|a|b"), None);
    }
}
