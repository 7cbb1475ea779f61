use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use super::{FlushObserver, SyncEngine};
use crate::connectivity::ConnectivityEdge;

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_info};

/// Kicks off a flush on every offline to online transition. Each flush runs
/// on its own task so a slow backend never delays edge detection.
pub async fn sync_loop(
    engine: Arc<SyncEngine>,
    observer: Arc<dyn FlushObserver>,
    mut edges: broadcast::Receiver<ConnectivityEdge>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            edge = edges.recv() => {
                match edge {
                    Ok(ConnectivityEdge::WentOnline) => {
                        log_info!("back online; flushing queued operations");
                    }
                    Ok(ConnectivityEdge::WentOffline) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        // a flush while offline only reports status
                        log_info!("missed {} connectivity edge(s); flushing to catch up", skipped);
                    }
                    Err(RecvError::Closed) => {
                        log_info!("connectivity monitor dropped; sync loop exiting");
                        break;
                    }
                }
                let engine = engine.clone();
                let observer = observer.clone();
                tokio::spawn(async move {
                    let outcome = engine.flush(observer.as_ref()).await;
                    log_debug!("reconnect flush finished: {:?}", outcome);
                });
            }
            _ = cancel_token.cancelled() => {
                log_info!("sync loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::db::Database;
    use crate::models::{Inspection, Report, WorkflowActionResult};
    use crate::queue::OperationQueue;
    use crate::remote::{CreateInspectionRequest, InspectionApi, RemoteError, RemoteResult};
    use crate::sync::SyncStatus;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Unreachable;

    #[async_trait]
    impl InspectionApi for Unreachable {
        async fn create_inspection(&self, _: &CreateInspectionRequest) -> RemoteResult<Inspection> {
            Err(RemoteError::network("offline"))
        }
        async fn upload_snapshot(&self, _: &str, _: &str) -> RemoteResult<String> {
            Err(RemoteError::network("offline"))
        }
        async fn complete_inspection(&self, _: &str, _: Option<&str>) -> RemoteResult<()> {
            Err(RemoteError::network("offline"))
        }
        async fn generate_report(&self, _: &str) -> RemoteResult<Report> {
            Err(RemoteError::network("offline"))
        }
        async fn get_report(&self, _: &str) -> RemoteResult<Report> {
            Err(RemoteError::network("offline"))
        }
        async fn download_report_pdf(&self, _: &str) -> RemoteResult<Vec<u8>> {
            Err(RemoteError::network("offline"))
        }
        async fn run_workflow_action(
            &self,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> RemoteResult<WorkflowActionResult> {
            Err(RemoteError::network("offline"))
        }
    }

    struct StatusSink(mpsc::UnboundedSender<SyncStatus>);

    #[async_trait]
    impl FlushObserver for StatusSink {
        async fn sync_status_changed(&self, status: &SyncStatus) {
            let _ = self.0.send(status.clone());
        }
    }

    fn spawn_loop(
        online: bool,
    ) -> (
        Arc<ConnectivityMonitor>,
        mpsc::UnboundedReceiver<SyncStatus>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let monitor = Arc::new(ConnectivityMonitor::new(online));
        let queue = OperationQueue::new(Database::in_memory().unwrap());
        let engine = Arc::new(SyncEngine::new(
            queue,
            Arc::new(Unreachable),
            monitor.clone(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(sync_loop(
            engine,
            Arc::new(StatusSink(tx)),
            monitor.subscribe_edges(),
            cancel.clone(),
        ));
        (monitor, rx, cancel, handle)
    }

    #[tokio::test]
    async fn reconnect_triggers_a_flush() {
        let (monitor, mut rx, cancel, handle) = spawn_loop(false);

        monitor.set_online(true);
        let status = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("flush should report status")
            .unwrap();
        assert!(status.online);
        assert_eq!(status.pending_count, 0);

        // going offline does not flush
        monitor.set_online(false);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn back_to_back_flip_still_flushes() {
        let (monitor, mut rx, cancel, handle) = spawn_loop(true);

        // both flips land before the loop gets to run
        monitor.set_online(false);
        monitor.set_online(true);

        let status = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("the reconnect should still flush")
            .unwrap();
        assert!(status.online);

        cancel.cancel();
        handle.await.unwrap();
    }
}
