use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::{
    connectivity::ConnectivityMonitor,
    events::{AppEvent, EventBus},
    models::{offline_snapshot_ref, InspectionId, QueuedOperation, Report, WorkflowActionResult},
    queue::OperationQueue,
    realtime::ClientMessage,
    remote::{CreateInspectionRequest, InspectionApi},
    sync::{FlushObserver, FlushOutcome, SyncEngine, SyncStatus},
};

use super::state::{transition, Effect, InspectionError, InspectionSession, SessionEvent};

pub type InspectionResult<T> = Result<T, InspectionError>;

/// What running one effect produced, as seen by the calling action.
enum EffectOutcome {
    Created,
    Queued(QueuedOperation),
    Uploaded(String),
    Completed(Report),
    Failed(InspectionError),
}

/// Owns the live session. Every state change goes through the pure
/// transition function; this type only performs the effects it asks for.
#[derive(Clone)]
pub struct InspectionController {
    session: Arc<Mutex<InspectionSession>>,
    queue: OperationQueue,
    api: Arc<dyn InspectionApi>,
    connectivity: Arc<ConnectivityMonitor>,
    sync: Arc<SyncEngine>,
    events: EventBus,
}

impl InspectionController {
    pub fn new(
        queue: OperationQueue,
        api: Arc<dyn InspectionApi>,
        connectivity: Arc<ConnectivityMonitor>,
        sync: Arc<SyncEngine>,
        events: EventBus,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(InspectionSession::new())),
            queue,
            api,
            connectivity,
            sync,
            events,
        }
    }

    pub async fn snapshot(&self) -> InspectionSession {
        self.session.lock().await.clone()
    }

    pub async fn start_inspection(
        &self,
        technician_id: &str,
        site_id: &str,
    ) -> InspectionResult<InspectionId> {
        let direct = self.connectivity.is_online();
        let outcomes = self
            .drive(SessionEvent::StartRequested {
                technician_id: technician_id.to_string(),
                site_id: site_id.to_string(),
                local_id: InspectionId::mint_local(),
                direct,
            })
            .await?;

        let session = self.snapshot().await;
        match session.id() {
            Some(id) => {
                info!("Inspection {} started", id);
                Ok(id.clone())
            }
            None => Err(last_failure(outcomes)
                .unwrap_or_else(|| InspectionError::validation("inspection did not start"))),
        }
    }

    /// Returns the stored image URL, or an `offline://snapshot/<opId>`
    /// placeholder when the upload was queued.
    pub async fn upload_snapshot(&self, frame_data_url: &str) -> InspectionResult<String> {
        let direct = self.can_reach_backend_for_current().await?;
        let outcomes = self
            .drive(SessionEvent::SnapshotRequested {
                frame_data_url: frame_data_url.to_string(),
                direct,
            })
            .await?;

        let mut failure = None;
        for outcome in outcomes {
            match outcome {
                EffectOutcome::Uploaded(url) => return Ok(url),
                EffectOutcome::Queued(operation) => {
                    return Ok(offline_snapshot_ref(&operation.operation_id))
                }
                EffectOutcome::Failed(err) => failure = Some(err),
                _ => {}
            }
        }
        Err(failure.unwrap_or_else(|| InspectionError::validation("snapshot was not stored")))
    }

    /// Returns the generated report, or `None` when completion was queued.
    pub async fn complete_inspection(
        &self,
        summary: Option<&str>,
    ) -> InspectionResult<Option<Report>> {
        let direct = self.can_reach_backend_for_current().await?;
        let outcomes = self
            .drive(SessionEvent::CompleteRequested {
                summary: summary.map(str::to_string),
                direct,
            })
            .await?;

        let mut failure = None;
        for outcome in outcomes {
            match outcome {
                EffectOutcome::Completed(report) => {
                    self.events.emit(AppEvent::ReportGenerated(report.clone()));
                    return Ok(Some(report));
                }
                EffectOutcome::Queued(_) => return Ok(None),
                EffectOutcome::Failed(err) => failure = Some(err),
                _ => {}
            }
        }
        Err(failure.unwrap_or_else(|| InspectionError::validation("inspection was not completed")))
    }

    /// Re-fetches the report of the active inspection, or of the most recent
    /// report when no inspection is active.
    pub async fn refresh_latest_report(&self) -> InspectionResult<Report> {
        let target = {
            let session = self.session.lock().await;
            match session.id() {
                Some(id) => id.remote().map(str::to_string),
                None => session.latest_report().map(|r| r.inspection_id.clone()),
            }
        };
        let Some(target) = target else {
            return Err(InspectionError::validation(
                "no synced inspection to load a report for",
            ));
        };
        self.load_report_for_inspection(&target).await
    }

    pub async fn load_report_for_inspection(&self, inspection_id: &str) -> InspectionResult<Report> {
        match self.api.get_report(inspection_id).await {
            Ok(report) => {
                self.drive(SessionEvent::ReportLoaded(report.clone())).await?;
                Ok(report)
            }
            Err(err) => {
                warn!("Failed to load report for {inspection_id}: {err}");
                self.drive(SessionEvent::ErrorRaised(err.to_string())).await?;
                Err(err.into())
            }
        }
    }

    pub async fn download_report_pdf(&self, inspection_id: &str) -> InspectionResult<Vec<u8>> {
        Ok(self.api.download_report_pdf(inspection_id).await?)
    }

    /// Triggers a follow-up action against the active inspection, or the one
    /// behind the latest report. Never queued.
    pub async fn run_workflow_action(
        &self,
        action: &str,
        note: Option<&str>,
    ) -> InspectionResult<WorkflowActionResult> {
        if action.trim().is_empty() {
            return Err(InspectionError::validation("workflow action is required"));
        }
        let target = {
            let session = self.session.lock().await;
            match session.id() {
                Some(InspectionId::Remote(id)) => Some(id.clone()),
                Some(InspectionId::Local(_)) => {
                    return Err(InspectionError::validation(
                        "workflow actions need a synced inspection",
                    ))
                }
                None => session.latest_report().map(|r| r.inspection_id.clone()),
            }
        };
        let Some(target) = target else {
            return Err(InspectionError::validation("no inspection to act on"));
        };
        if self.connectivity.is_offline() {
            return Err(InspectionError::validation(
                "workflow actions are unavailable offline",
            ));
        }

        let result = self.api.run_workflow_action(&target, action, note).await?;
        info!(
            "Workflow action {action} on {target}: {} ({})",
            result.status, result.result_message
        );
        Ok(result)
    }

    pub async fn sync_now(&self) -> FlushOutcome {
        self.sync.flush(self).await
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.sync.status().await
    }

    /// Context announcement for the realtime channel; only synced
    /// inspections have an id the backend understands.
    pub async fn context_message(&self) -> Option<ClientMessage> {
        let session = self.session.lock().await;
        session
            .id()
            .and_then(InspectionId::remote)
            .map(|id| ClientMessage::InspectionContext {
                inspection_id: id.to_string(),
            })
    }

    pub async fn clear_error(&self) {
        if let Err(err) = self.drive(SessionEvent::ErrorCleared).await {
            error!("Failed to clear session error: {err}");
        }
    }

    /// Direct calls are only safe when nothing for the same inspection is
    /// still waiting in the queue.
    async fn can_reach_backend_for_current(&self) -> InspectionResult<bool> {
        if self.connectivity.is_offline() {
            return Ok(false);
        }
        let id = self.session.lock().await.id().cloned();
        match id {
            Some(id) if !id.is_local() => Ok(self.queue.pending_for(&id).await? == 0),
            _ => Ok(false),
        }
    }

    async fn apply(&self, event: SessionEvent) -> InspectionResult<Vec<Effect>> {
        let mut session = self.session.lock().await;
        let step = transition(&session, event)?;
        let changed = step.session != *session;
        *session = step.session;
        if changed {
            self.events
                .emit(AppEvent::InspectionStateChanged(session.clone()));
        }
        Ok(step.effects)
    }

    /// Feeds an event through the state machine, runs the effects it asks
    /// for and feeds their outcomes back until nothing is left to do.
    async fn drive(&self, event: SessionEvent) -> InspectionResult<Vec<EffectOutcome>> {
        let mut pending = VecDeque::from([event]);
        let mut outcomes = Vec::new();
        while let Some(event) = pending.pop_front() {
            for effect in self.apply(event).await? {
                let (outcome, follow_up) = self.execute(effect).await;
                outcomes.push(outcome);
                pending.push_back(follow_up);
            }
        }

        let queued = outcomes
            .iter()
            .any(|outcome| matches!(outcome, EffectOutcome::Queued(_)));
        if queued && self.connectivity.is_online() {
            self.spawn_flush();
        }
        Ok(outcomes)
    }

    /// Work queued while online has no reconnect coming to flush it.
    fn spawn_flush(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            let outcome = controller.sync.flush(&controller).await;
            info!("Background flush finished: {:?}", outcome);
        });
    }

    async fn execute(&self, effect: Effect) -> (EffectOutcome, SessionEvent) {
        match effect {
            Effect::CreateRemote {
                technician_id,
                site_id,
            } => {
                let request = CreateInspectionRequest {
                    technician_id,
                    site_id,
                };
                match self.api.create_inspection(&request).await {
                    Ok(inspection) => (
                        EffectOutcome::Created,
                        SessionEvent::Created {
                            remote_id: inspection.id,
                        },
                    ),
                    Err(err) => {
                        warn!("Create inspection failed: {err}");
                        (
                            EffectOutcome::Failed(err.clone().into()),
                            SessionEvent::CreateFailed(err),
                        )
                    }
                }
            }
            Effect::Enqueue { target, payload } => {
                match self.queue.enqueue(&target, payload).await {
                    Ok(operation) => {
                        self.publish_sync_status().await;
                        (
                            EffectOutcome::Queued(operation),
                            SessionEvent::Queued { id: target },
                        )
                    }
                    Err(err) => {
                        error!("Failed to queue operation for {target}: {err:#}");
                        let message = format!("could not save offline work: {err:#}");
                        (
                            EffectOutcome::Failed(err.into()),
                            SessionEvent::QueueFailed {
                                id: target,
                                message,
                            },
                        )
                    }
                }
            }
            Effect::UploadRemote { id, frame_data_url } => {
                match self.api.upload_snapshot(&id, &frame_data_url).await {
                    Ok(url) => (
                        EffectOutcome::Uploaded(url),
                        SessionEvent::SnapshotUploaded {
                            id: InspectionId::Remote(id),
                        },
                    ),
                    Err(err) => {
                        warn!("Snapshot upload for {id} failed: {err}");
                        (
                            EffectOutcome::Failed(err.clone().into()),
                            SessionEvent::SnapshotFailed {
                                id: InspectionId::Remote(id),
                                frame_data_url,
                                error: err,
                            },
                        )
                    }
                }
            }
            Effect::CompleteRemote { id, summary } => {
                let target = InspectionId::Remote(id.clone());
                if let Err(err) = self.api.complete_inspection(&id, summary.as_deref()).await {
                    warn!("Completing {id} failed: {err}");
                    return (
                        EffectOutcome::Failed(err.clone().into()),
                        SessionEvent::CompleteFailed {
                            id: target,
                            summary,
                            completed: false,
                            error: err,
                        },
                    );
                }
                match self.api.generate_report(&id).await {
                    Ok(report) => (
                        EffectOutcome::Completed(report.clone()),
                        SessionEvent::Completed { id: target, report },
                    ),
                    Err(err) => {
                        warn!("Report generation for {id} failed: {err}");
                        (
                            EffectOutcome::Failed(err.clone().into()),
                            SessionEvent::CompleteFailed {
                                id: target,
                                summary,
                                completed: true,
                                error: err,
                            },
                        )
                    }
                }
            }
        }
    }

    async fn publish_sync_status(&self) {
        let status = self.sync.status().await;
        self.events.emit(AppEvent::SyncStatusChanged(status));
    }
}

fn last_failure(outcomes: Vec<EffectOutcome>) -> Option<InspectionError> {
    outcomes.into_iter().rev().find_map(|outcome| match outcome {
        EffectOutcome::Failed(err) => Some(err),
        _ => None,
    })
}

#[async_trait]
impl FlushObserver for InspectionController {
    async fn inspection_remapped(&self, local: &InspectionId, remote: &InspectionId) {
        if let Err(err) = self
            .drive(SessionEvent::Remapped {
                local: local.clone(),
                remote: remote.clone(),
            })
            .await
        {
            error!("Failed to apply id remap {local} -> {remote}: {err}");
        }
        self.events.emit(AppEvent::InspectionRemapped {
            local: local.clone(),
            remote: remote.clone(),
        });
    }

    async fn report_generated(&self, report: &Report) {
        if let Err(err) = self.drive(SessionEvent::ReportLoaded(report.clone())).await {
            error!("Failed to store generated report: {err}");
        }
        self.events.emit(AppEvent::ReportGenerated(report.clone()));
    }

    async fn sync_status_changed(&self, status: &SyncStatus) {
        self.events.emit(AppEvent::SyncStatusChanged(status.clone()));
    }
}
