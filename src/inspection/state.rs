use serde::Serialize;
use thiserror::Error;

use crate::models::{InspectionId, OperationPayload, Report};
use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum InspectionError {
    /// The action does not make sense in the current session state.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl InspectionError {
    pub fn validation(message: impl Into<String>) -> Self {
        InspectionError::Validation(message.into())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    NoSession,
    Starting,
    Active,
    Busy,
    Completing,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingStart {
    technician_id: String,
    site_id: String,
    local_id: InspectionId,
}

/// The one live inspection on this client. `id` is set exactly while the
/// status is Active, Busy or Completing.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InspectionSession {
    status: SessionStatus,
    id: Option<InspectionId>,
    error: Option<String>,
    latest_report: Option<Report>,
    #[serde(skip)]
    starting: Option<PendingStart>,
    #[serde(skip)]
    uploads_in_flight: u32,
    /// Local token this session carried before its create was confirmed.
    #[serde(skip)]
    remapped_from: Option<String>,
}

impl InspectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn id(&self) -> Option<&InspectionId> {
        self.id.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn latest_report(&self) -> Option<&Report> {
        self.latest_report.as_ref()
    }

    fn refers_to(&self, id: &InspectionId) -> bool {
        if self.id.as_ref() == Some(id) {
            return true;
        }
        match (id, &self.remapped_from) {
            (InspectionId::Local(token), Some(previous)) => token == previous,
            _ => false,
        }
    }

    fn enter(&mut self, status: SessionStatus, id: Option<InspectionId>) {
        if id != self.id {
            self.remapped_from = None;
        }
        self.status = status;
        self.id = id;
        self.starting = None;
        self.uploads_in_flight = 0;
    }

    fn close(&mut self) {
        self.enter(SessionStatus::NoSession, None);
    }

    fn active_id(&self, action: &str) -> Result<InspectionId, InspectionError> {
        match (&self.status, &self.id) {
            (SessionStatus::Active | SessionStatus::Busy, Some(id)) => Ok(id.clone()),
            (SessionStatus::Completing, _) => Err(InspectionError::validation(format!(
                "cannot {action}: the inspection is being completed"
            ))),
            _ => Err(InspectionError::validation(format!(
                "cannot {action}: no active inspection"
            ))),
        }
    }
}

/// Inputs to the state machine: user intents plus the outcomes of effects.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StartRequested {
        technician_id: String,
        site_id: String,
        /// Identity to fall back to if the backend cannot be reached.
        local_id: InspectionId,
        direct: bool,
    },
    Created {
        remote_id: String,
    },
    CreateFailed(RemoteError),
    SnapshotRequested {
        frame_data_url: String,
        direct: bool,
    },
    SnapshotUploaded {
        id: InspectionId,
    },
    SnapshotFailed {
        id: InspectionId,
        frame_data_url: String,
        error: RemoteError,
    },
    CompleteRequested {
        summary: Option<String>,
        direct: bool,
    },
    Completed {
        id: InspectionId,
        report: Report,
    },
    CompleteFailed {
        id: InspectionId,
        summary: Option<String>,
        /// The backend accepted completion; only the report is missing.
        completed: bool,
        error: RemoteError,
    },
    Queued {
        id: InspectionId,
    },
    QueueFailed {
        id: InspectionId,
        message: String,
    },
    Remapped {
        local: InspectionId,
        remote: InspectionId,
    },
    ReportLoaded(Report),
    ErrorRaised(String),
    ErrorCleared,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CreateRemote {
        technician_id: String,
        site_id: String,
    },
    Enqueue {
        target: InspectionId,
        payload: OperationPayload,
    },
    UploadRemote {
        id: String,
        frame_data_url: String,
    },
    CompleteRemote {
        id: String,
        summary: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub session: InspectionSession,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(session: InspectionSession) -> Self {
        Self {
            session,
            effects: Vec::new(),
        }
    }

    fn with(session: InspectionSession, effect: Effect) -> Self {
        Self {
            session,
            effects: vec![effect],
        }
    }
}

/// Computes the next session and the effects to run. Never performs I/O.
/// Outcomes that name an inspection this session no longer is are ignored.
pub fn transition(
    current: &InspectionSession,
    event: SessionEvent,
) -> Result<Transition, InspectionError> {
    let mut next = current.clone();

    match event {
        SessionEvent::StartRequested {
            technician_id,
            site_id,
            local_id,
            direct,
        } => {
            if current.status != SessionStatus::NoSession {
                return Err(InspectionError::validation(
                    "an inspection is already in progress",
                ));
            }
            if technician_id.trim().is_empty() || site_id.trim().is_empty() {
                return Err(InspectionError::validation(
                    "technician and site are required",
                ));
            }
            if !local_id.is_local() {
                return Err(InspectionError::validation(
                    "fallback inspection id must be local",
                ));
            }

            next.enter(SessionStatus::Starting, None);
            next.error = None;
            next.starting = Some(PendingStart {
                technician_id: technician_id.clone(),
                site_id: site_id.clone(),
                local_id: local_id.clone(),
            });

            let effect = if direct {
                Effect::CreateRemote {
                    technician_id,
                    site_id,
                }
            } else {
                Effect::Enqueue {
                    target: local_id,
                    payload: OperationPayload::CreateInspection {
                        technician_id,
                        site_id,
                    },
                }
            };
            Ok(Transition::with(next, effect))
        }

        SessionEvent::Created { remote_id } => {
            if current.status != SessionStatus::Starting {
                return Ok(Transition::to(next));
            }
            next.enter(SessionStatus::Active, Some(InspectionId::Remote(remote_id)));
            Ok(Transition::to(next))
        }

        SessionEvent::CreateFailed(error) => {
            let Some(pending) = current.starting.clone() else {
                return Ok(Transition::to(next));
            };
            if error.is_transient() {
                return Ok(Transition::with(
                    next,
                    Effect::Enqueue {
                        target: pending.local_id,
                        payload: OperationPayload::CreateInspection {
                            technician_id: pending.technician_id,
                            site_id: pending.site_id,
                        },
                    },
                ));
            }
            next.close();
            next.error = Some(error.to_string());
            Ok(Transition::to(next))
        }

        SessionEvent::SnapshotRequested {
            frame_data_url,
            direct,
        } => {
            let id = current.active_id("upload a snapshot")?;
            next.status = SessionStatus::Busy;
            next.uploads_in_flight = current.uploads_in_flight + 1;

            let effect = match id.remote() {
                Some(remote) if direct => Effect::UploadRemote {
                    id: remote.to_string(),
                    frame_data_url,
                },
                _ => Effect::Enqueue {
                    target: id.clone(),
                    payload: OperationPayload::UploadSnapshot { frame_data_url },
                },
            };
            Ok(Transition::with(next, effect))
        }

        SessionEvent::SnapshotUploaded { id } => {
            if current.refers_to(&id) {
                settle_upload(&mut next, None);
            }
            Ok(Transition::to(next))
        }

        SessionEvent::SnapshotFailed {
            id,
            frame_data_url,
            error,
        } => {
            if !current.refers_to(&id) {
                return Ok(Transition::to(next));
            }
            if error.is_transient() {
                return Ok(Transition::with(
                    next,
                    Effect::Enqueue {
                        target: id,
                        payload: OperationPayload::UploadSnapshot { frame_data_url },
                    },
                ));
            }
            settle_upload(&mut next, Some(error.to_string()));
            Ok(Transition::to(next))
        }

        SessionEvent::CompleteRequested { summary, direct } => {
            let id = match (&current.status, &current.id) {
                (SessionStatus::Active, Some(id)) => id.clone(),
                (SessionStatus::Busy, Some(_)) => {
                    return Err(InspectionError::validation(
                        "cannot complete while a snapshot is still uploading",
                    ))
                }
                (SessionStatus::Completing, Some(_)) => {
                    return Err(InspectionError::validation(
                        "the inspection is already being completed",
                    ))
                }
                _ => {
                    return Err(InspectionError::validation(
                        "cannot complete: no active inspection",
                    ))
                }
            };
            next.status = SessionStatus::Completing;
            next.error = None;

            let effect = match id.remote() {
                Some(remote) if direct => Effect::CompleteRemote {
                    id: remote.to_string(),
                    summary,
                },
                _ => Effect::Enqueue {
                    target: id.clone(),
                    payload: OperationPayload::CompleteInspection {
                        summary,
                        completed: false,
                    },
                },
            };
            Ok(Transition::with(next, effect))
        }

        SessionEvent::Completed { id, report } => {
            if current.refers_to(&id) && current.status == SessionStatus::Completing {
                next.close();
            }
            next.latest_report = Some(report);
            Ok(Transition::to(next))
        }

        SessionEvent::CompleteFailed {
            id,
            summary,
            completed,
            error,
        } => {
            if !current.refers_to(&id) || current.status != SessionStatus::Completing {
                return Ok(Transition::to(next));
            }
            if error.is_transient() {
                return Ok(Transition::with(
                    next,
                    Effect::Enqueue {
                        target: id,
                        payload: OperationPayload::CompleteInspection { summary, completed },
                    },
                ));
            }
            if completed {
                // The backend closed the inspection; only its report was refused.
                next.close();
            } else {
                next.status = SessionStatus::Active;
            }
            next.error = Some(error.to_string());
            Ok(Transition::to(next))
        }

        SessionEvent::Queued { id } => {
            match current.status {
                SessionStatus::Starting => {
                    let starts_with_id = current
                        .starting
                        .as_ref()
                        .is_some_and(|pending| pending.local_id == id);
                    if starts_with_id {
                        next.enter(SessionStatus::Active, Some(id));
                    }
                }
                SessionStatus::Busy if current.refers_to(&id) => settle_upload(&mut next, None),
                SessionStatus::Completing if current.refers_to(&id) => next.close(),
                _ => {}
            }
            Ok(Transition::to(next))
        }

        SessionEvent::QueueFailed { id, message } => {
            match current.status {
                SessionStatus::Starting => {
                    let starts_with_id = current
                        .starting
                        .as_ref()
                        .is_some_and(|pending| pending.local_id == id);
                    if starts_with_id {
                        next.close();
                        next.error = Some(message);
                    }
                }
                SessionStatus::Busy if current.refers_to(&id) => {
                    settle_upload(&mut next, Some(message))
                }
                SessionStatus::Completing if current.refers_to(&id) => {
                    next.status = SessionStatus::Active;
                    next.error = Some(message);
                }
                _ => {}
            }
            Ok(Transition::to(next))
        }

        SessionEvent::Remapped { local, remote } => {
            if current.id.as_ref() == Some(&local) {
                next.id = Some(remote);
                next.remapped_from = Some(local.token().to_string());
            }
            Ok(Transition::to(next))
        }

        SessionEvent::ReportLoaded(report) => {
            next.latest_report = Some(report);
            Ok(Transition::to(next))
        }

        SessionEvent::ErrorRaised(message) => {
            next.error = Some(message);
            Ok(Transition::to(next))
        }

        SessionEvent::ErrorCleared => {
            next.error = None;
            Ok(Transition::to(next))
        }
    }
}

fn settle_upload(session: &mut InspectionSession, error: Option<String>) {
    if session.status != SessionStatus::Busy {
        return;
    }
    session.uploads_in_flight = session.uploads_in_flight.saturating_sub(1);
    if session.uploads_in_flight == 0 {
        session.status = SessionStatus::Active;
    }
    if error.is_some() {
        session.error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn report(id: &str) -> Report {
        Report {
            inspection_id: id.to_string(),
            generated_at: Utc::now(),
            status: "final".into(),
            findings: Vec::new(),
            safety_summary: Vec::new(),
            workflow_summary: Vec::new(),
            recommended_actions: Vec::new(),
            image_count: 0,
            summary_text: String::new(),
        }
    }

    fn apply(session: &InspectionSession, event: SessionEvent) -> Transition {
        transition(session, event).unwrap()
    }

    fn start(direct: bool) -> (Transition, InspectionId) {
        let local = InspectionId::mint_local();
        let t = apply(
            &InspectionSession::new(),
            SessionEvent::StartRequested {
                technician_id: "t1".into(),
                site_id: "s1".into(),
                local_id: local.clone(),
                direct,
            },
        );
        (t, local)
    }

    fn active(id: InspectionId) -> InspectionSession {
        let mut session = InspectionSession::new();
        session.enter(SessionStatus::Active, Some(id));
        session
    }

    #[test]
    fn offline_start_enqueues_create_then_activates_locally() {
        let (t, local) = start(false);
        assert_eq!(t.session.status(), SessionStatus::Starting);
        assert_eq!(t.session.id(), None);
        assert_eq!(
            t.effects,
            vec![Effect::Enqueue {
                target: local.clone(),
                payload: OperationPayload::CreateInspection {
                    technician_id: "t1".into(),
                    site_id: "s1".into(),
                },
            }]
        );

        let t = apply(&t.session, SessionEvent::Queued { id: local.clone() });
        assert_eq!(t.session.status(), SessionStatus::Active);
        assert_eq!(t.session.id(), Some(&local));
    }

    #[test]
    fn online_start_uses_server_id() {
        let (t, _) = start(true);
        assert!(matches!(t.effects[0], Effect::CreateRemote { .. }));

        let t = apply(
            &t.session,
            SessionEvent::Created {
                remote_id: "insp-1".into(),
            },
        );
        assert_eq!(t.session.status(), SessionStatus::Active);
        assert_eq!(t.session.id(), Some(&InspectionId::Remote("insp-1".into())));
    }

    #[test]
    fn transient_create_failure_falls_back_to_queue() {
        let (t, local) = start(true);
        let t = apply(
            &t.session,
            SessionEvent::CreateFailed(RemoteError::timeout("slow")),
        );
        assert_eq!(t.session.status(), SessionStatus::Starting);
        assert!(matches!(&t.effects[0], Effect::Enqueue { target, .. } if *target == local));
        assert_eq!(t.session.error(), None);
    }

    #[test]
    fn rejected_create_surfaces_error() {
        let (t, _) = start(true);
        let t = apply(
            &t.session,
            SessionEvent::CreateFailed(RemoteError::rejected(422, "unknown site")),
        );
        assert_eq!(t.session.status(), SessionStatus::NoSession);
        assert_eq!(t.session.id(), None);
        assert!(t.effects.is_empty());
        assert!(t.session.error().unwrap().contains("unknown site"));
    }

    #[test]
    fn second_start_is_rejected() {
        let session = active(InspectionId::mint_local());
        let err = transition(
            &session,
            SessionEvent::StartRequested {
                technician_id: "t".into(),
                site_id: "s".into(),
                local_id: InspectionId::mint_local(),
                direct: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, InspectionError::Validation(_)));
    }

    #[test]
    fn upload_without_session_is_a_validation_error() {
        let err = transition(
            &InspectionSession::new(),
            SessionEvent::SnapshotRequested {
                frame_data_url: "data:,".into(),
                direct: true,
            },
        )
        .unwrap_err();
        assert!(matches!(err, InspectionError::Validation(_)));
    }

    #[test]
    fn local_session_uploads_are_queued_even_when_online() {
        let local = InspectionId::mint_local();
        let t = apply(
            &active(local.clone()),
            SessionEvent::SnapshotRequested {
                frame_data_url: "data:image/jpeg;base64,AA==".into(),
                direct: true,
            },
        );
        assert_eq!(t.session.status(), SessionStatus::Busy);
        assert!(matches!(&t.effects[0], Effect::Enqueue { target, .. } if *target == local));

        let t = apply(&t.session, SessionEvent::Queued { id: local });
        assert_eq!(t.session.status(), SessionStatus::Active);
    }

    #[test]
    fn rejected_upload_is_not_queued() {
        let remote = InspectionId::Remote("insp-1".into());
        let t = apply(
            &active(remote.clone()),
            SessionEvent::SnapshotRequested {
                frame_data_url: "data:image/jpeg;base64,AA==".into(),
                direct: true,
            },
        );
        assert!(matches!(t.effects[0], Effect::UploadRemote { .. }));

        let t = apply(
            &t.session,
            SessionEvent::SnapshotFailed {
                id: remote.clone(),
                frame_data_url: "data:image/jpeg;base64,AA==".into(),
                error: RemoteError::rejected(413, "too large"),
            },
        );
        assert!(t.effects.is_empty());
        assert_eq!(t.session.status(), SessionStatus::Active);
        assert_eq!(t.session.id(), Some(&remote));
        assert!(t.session.error().is_some());
    }

    #[test]
    fn overlapping_uploads_stay_busy_until_all_settle() {
        let remote = InspectionId::Remote("insp-1".into());
        let request = SessionEvent::SnapshotRequested {
            frame_data_url: "data:,".into(),
            direct: true,
        };
        let t = apply(&active(remote.clone()), request.clone());
        let t = apply(&t.session, request);
        let t = apply(&t.session, SessionEvent::SnapshotUploaded { id: remote.clone() });
        assert_eq!(t.session.status(), SessionStatus::Busy);
        let t = apply(&t.session, SessionEvent::SnapshotUploaded { id: remote });
        assert_eq!(t.session.status(), SessionStatus::Active);
    }

    #[test]
    fn online_completion_stores_report_and_closes() {
        let remote = InspectionId::Remote("insp-1".into());
        let t = apply(
            &active(remote.clone()),
            SessionEvent::CompleteRequested {
                summary: Some("ok".into()),
                direct: true,
            },
        );
        assert_eq!(
            t.effects,
            vec![Effect::CompleteRemote {
                id: "insp-1".into(),
                summary: Some("ok".into()),
            }]
        );

        let t = apply(
            &t.session,
            SessionEvent::Completed {
                id: remote,
                report: report("insp-1"),
            },
        );
        assert_eq!(t.session.status(), SessionStatus::NoSession);
        assert_eq!(t.session.id(), None);
        assert_eq!(t.session.latest_report().unwrap().inspection_id, "insp-1");
    }

    #[test]
    fn rejected_completion_keeps_id_for_retry() {
        let remote = InspectionId::Remote("insp-1".into());
        let t = apply(
            &active(remote.clone()),
            SessionEvent::CompleteRequested {
                summary: None,
                direct: true,
            },
        );
        let t = apply(
            &t.session,
            SessionEvent::CompleteFailed {
                id: remote.clone(),
                summary: None,
                completed: false,
                error: RemoteError::rejected(409, "missing snapshots"),
            },
        );
        assert_eq!(t.session.status(), SessionStatus::Active);
        assert_eq!(t.session.id(), Some(&remote));
        assert!(t.effects.is_empty());
    }

    #[test]
    fn report_failure_after_completion_queues_report_only() {
        let remote = InspectionId::Remote("insp-1".into());
        let t = apply(
            &active(remote.clone()),
            SessionEvent::CompleteRequested {
                summary: None,
                direct: true,
            },
        );
        let t = apply(
            &t.session,
            SessionEvent::CompleteFailed {
                id: remote.clone(),
                summary: None,
                completed: true,
                error: RemoteError::network("reset"),
            },
        );
        assert_eq!(
            t.effects,
            vec![Effect::Enqueue {
                target: remote.clone(),
                payload: OperationPayload::CompleteInspection {
                    summary: None,
                    completed: true,
                },
            }]
        );
        let t = apply(&t.session, SessionEvent::Queued { id: remote });
        assert_eq!(t.session.status(), SessionStatus::NoSession);
    }

    #[test]
    fn rejected_report_after_completion_closes_session() {
        let remote = InspectionId::Remote("insp-1".into());
        let t = apply(
            &active(remote.clone()),
            SessionEvent::CompleteRequested {
                summary: None,
                direct: true,
            },
        );
        let t = apply(
            &t.session,
            SessionEvent::CompleteFailed {
                id: remote,
                summary: None,
                completed: true,
                error: RemoteError::rejected(500, "report template missing"),
            },
        );
        assert!(t.effects.is_empty());
        assert_eq!(t.session.status(), SessionStatus::NoSession);
        assert!(t.session.error().is_some());
    }

    #[test]
    fn complete_while_uploading_is_rejected() {
        let remote = InspectionId::Remote("insp-1".into());
        let t = apply(
            &active(remote),
            SessionEvent::SnapshotRequested {
                frame_data_url: "data:,".into(),
                direct: true,
            },
        );
        let err = transition(
            &t.session,
            SessionEvent::CompleteRequested {
                summary: None,
                direct: true,
            },
        )
        .unwrap_err();
        assert!(matches!(err, InspectionError::Validation(_)));
    }

    #[test]
    fn remap_repoints_session_and_accepts_late_local_outcomes() {
        let local = InspectionId::mint_local();
        let remote = InspectionId::Remote("insp-99".into());
        let t = apply(
            &active(local.clone()),
            SessionEvent::SnapshotRequested {
                frame_data_url: "data:,".into(),
                direct: false,
            },
        );
        let t = apply(
            &t.session,
            SessionEvent::Remapped {
                local: local.clone(),
                remote: remote.clone(),
            },
        );
        assert_eq!(t.session.id(), Some(&remote));

        let t = apply(&t.session, SessionEvent::Queued { id: local });
        assert_eq!(t.session.status(), SessionStatus::Active);
    }

    #[test]
    fn stale_outcomes_are_ignored() {
        let session = active(InspectionId::Remote("insp-2".into()));
        let t = apply(
            &session,
            SessionEvent::SnapshotUploaded {
                id: InspectionId::Remote("insp-1".into()),
            },
        );
        assert_eq!(t.session, session);

        let t = apply(
            &session,
            SessionEvent::Created {
                remote_id: "insp-3".into(),
            },
        );
        assert_eq!(t.session, session);
    }

    #[test]
    fn serializes_for_observers() {
        let session = active(InspectionId::Remote("insp-1".into()));
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["id"]["origin"], "remote");
        assert_eq!(json["id"]["token"], "insp-1");
        assert!(json.get("uploadsInFlight").is_none());
    }
}
