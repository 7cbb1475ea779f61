use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use log::{error, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::connectivity::ConnectivityMonitor;
use crate::models::{InspectionId, OperationPayload, QueuedOperation, Report};
use crate::queue::OperationQueue;
use crate::remote::{CreateInspectionRequest, InspectionApi, RemoteError};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending_count: u64,
    pub online: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was attempted because the backend is unreachable.
    Offline { pending: u64 },
    /// Another pass was in progress; this request collapsed into it.
    AlreadyRunning,
    Drained { flushed: usize },
    /// The pass halted at `operation_id`; it and everything after it stay queued.
    Stopped {
        flushed: usize,
        pending: u64,
        operation_id: String,
        error: String,
    },
}

/// Hooks the flusher calls as queued work lands on the backend.
#[async_trait]
pub trait FlushObserver: Send + Sync {
    async fn inspection_remapped(&self, _local: &InspectionId, _remote: &InspectionId) {}

    async fn report_generated(&self, _report: &Report) {}

    async fn sync_status_changed(&self, _status: &SyncStatus) {}
}

/// Observer for callers that only care about the returned outcome.
pub struct NoopObserver;

impl FlushObserver for NoopObserver {}

#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("storage: {0:#}")]
    Storage(#[from] anyhow::Error),
    #[error("{0} has no server id yet")]
    Unresolved(InspectionId),
}

/// Local-to-server id table for one flush pass. Operations queued after a
/// pass are re-pointed by the queue itself, see `OperationQueue::enqueue`.
#[derive(Debug, Default)]
pub struct IdentifierMapping {
    entries: HashMap<String, String>,
}

impl IdentifierMapping {
    pub fn insert(&mut self, local_token: &str, remote_token: &str) {
        self.entries
            .insert(local_token.to_string(), remote_token.to_string());
    }

    pub fn resolve(&self, id: &InspectionId) -> InspectionId {
        match id {
            InspectionId::Local(token) => match self.entries.get(token) {
                Some(remote) => id.remapped(token, remote),
                None => id.clone(),
            },
            InspectionId::Remote(_) => id.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    queue: OperationQueue,
    api: Arc<dyn InspectionApi>,
    connectivity: Arc<ConnectivityMonitor>,
    running: AtomicBool,
    /// Raised by every flush request; a running pass that sees it goes again.
    rerun: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl SyncEngine {
    pub fn new(
        queue: OperationQueue,
        api: Arc<dyn InspectionApi>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            queue,
            api,
            connectivity,
            running: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn begin_pass(&self) -> Option<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(&self.running))
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            pending_count: self.pending_count().await,
            online: self.connectivity.is_online(),
            last_error: self.last_error(),
        }
    }

    fn last_error(&self) -> Option<String> {
        match self.last_error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_last_error(&self, value: Option<String>) {
        let mut guard = match self.last_error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = value;
    }

    async fn pending_count(&self) -> u64 {
        match self.queue.pending_count().await {
            Ok(count) => count,
            Err(err) => {
                error!("Failed to count queued operations: {err:#}");
                0
            }
        }
    }

    /// Drains the queue in enqueue order, stopping at the first failure.
    /// Concurrent calls collapse: only one pass runs at a time, and a request
    /// that arrives mid-pass makes the running flush go around again once it
    /// has drained, so work queued during a pass is not left behind.
    pub async fn flush(&self, observer: &dyn FlushObserver) -> FlushOutcome {
        if self.connectivity.is_offline() {
            let status = self.status().await;
            observer.sync_status_changed(&status).await;
            return FlushOutcome::Offline {
                pending: status.pending_count,
            };
        }

        // Raised before claiming so the holder observes it before releasing.
        self.rerun.store(true, Ordering::SeqCst);
        let Some(mut guard) = self.begin_pass() else {
            return FlushOutcome::AlreadyRunning;
        };

        let mut flushed = 0;
        let outcome = loop {
            self.rerun.store(false, Ordering::SeqCst);
            match self.run_pass(observer).await {
                FlushOutcome::Drained { flushed: count } => flushed += count,
                FlushOutcome::Stopped {
                    flushed: count,
                    pending,
                    operation_id,
                    error,
                } => {
                    break FlushOutcome::Stopped {
                        flushed: flushed + count,
                        pending,
                        operation_id,
                        error,
                    }
                }
                other => break other,
            }

            if self.connectivity.is_offline() {
                break FlushOutcome::Drained { flushed };
            }
            if self.rerun.load(Ordering::SeqCst) {
                info!("Flush requested during the pass; going again");
                continue;
            }

            drop(guard);
            // A request may land between the check above and the release.
            let next = if self.rerun.load(Ordering::SeqCst) {
                self.begin_pass()
            } else {
                None
            };
            match next {
                Some(next) => guard = next,
                None => break FlushOutcome::Drained { flushed },
            }
        };

        match &outcome {
            FlushOutcome::Stopped { error, .. } => self.set_last_error(Some(error.clone())),
            _ => self.set_last_error(None),
        }
        let status = self.status().await;
        observer.sync_status_changed(&status).await;
        outcome
    }

    async fn run_pass(&self, observer: &dyn FlushObserver) -> FlushOutcome {
        let operations = match self.queue.list().await {
            Ok(operations) => operations,
            Err(err) => {
                return FlushOutcome::Stopped {
                    flushed: 0,
                    pending: self.pending_count().await,
                    operation_id: String::new(),
                    error: format!("failed to read queue: {err:#}"),
                }
            }
        };

        if operations.is_empty() {
            return FlushOutcome::Drained { flushed: 0 };
        }
        info!("Flushing {} queued operation(s)", operations.len());

        let mut mapping = IdentifierMapping::default();
        let mut flushed = 0;
        for operation in operations {
            if let Err(err) = self.apply(&operation, &mut mapping, observer).await {
                warn!(
                    "Flush stopped at {} ({}): {err}",
                    operation.operation_id,
                    operation.kind().as_str()
                );
                return FlushOutcome::Stopped {
                    flushed,
                    pending: self.pending_count().await,
                    operation_id: operation.operation_id,
                    error: err.to_string(),
                };
            }
            flushed += 1;
        }

        info!("Flush drained {flushed} operation(s)");
        FlushOutcome::Drained { flushed }
    }

    async fn apply(
        &self,
        operation: &QueuedOperation,
        mapping: &mut IdentifierMapping,
        observer: &dyn FlushObserver,
    ) -> Result<(), StepError> {
        match &operation.payload {
            OperationPayload::CreateInspection {
                technician_id,
                site_id,
            } => {
                let InspectionId::Local(local_token) = &operation.target else {
                    warn!(
                        "Create {} already targets {}; dropping it",
                        operation.operation_id, operation.target
                    );
                    self.queue.remove(operation).await?;
                    return Ok(());
                };

                let inspection = self
                    .api
                    .create_inspection(&CreateInspectionRequest {
                        technician_id: technician_id.clone(),
                        site_id: site_id.clone(),
                    })
                    .await?;

                mapping.insert(local_token, &inspection.id);
                let retargeted = self
                    .queue
                    .resolve_create(operation, local_token, &inspection.id)
                    .await?;
                info!(
                    "Inspection {} is now {} ({} queued operation(s) re-pointed)",
                    operation.target, inspection.id, retargeted
                );

                observer
                    .inspection_remapped(
                        &operation.target,
                        &InspectionId::Remote(inspection.id.clone()),
                    )
                    .await;
                Ok(())
            }
            OperationPayload::UploadSnapshot { frame_data_url } => {
                let target = mapping.resolve(&operation.target);
                let remote = target
                    .remote()
                    .ok_or_else(|| StepError::Unresolved(target.clone()))?;

                let image_url = self.api.upload_snapshot(remote, frame_data_url).await?;
                self.queue.remove(operation).await?;
                info!("Uploaded queued snapshot {} as {}", operation.operation_id, image_url);
                Ok(())
            }
            OperationPayload::CompleteInspection { summary, completed } => {
                let target = mapping.resolve(&operation.target);
                let remote = target
                    .remote()
                    .ok_or_else(|| StepError::Unresolved(target.clone()))?;

                if !completed {
                    self.api
                        .complete_inspection(remote, summary.as_deref())
                        .await?;
                }

                let report = match self.api.generate_report(remote).await {
                    Ok(report) => report,
                    Err(err) => {
                        if !completed {
                            // Completion is accepted; the next pass only regenerates.
                            self.queue
                                .replace_payload(
                                    operation,
                                    OperationPayload::CompleteInspection {
                                        summary: summary.clone(),
                                        completed: true,
                                    },
                                )
                                .await?;
                        }
                        return Err(err.into());
                    }
                };

                self.queue.remove(operation).await?;
                observer.report_generated(&report).await;
                Ok(())
            }
        }
    }
}
