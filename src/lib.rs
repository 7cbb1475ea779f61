pub mod connectivity;
pub mod db;
pub mod events;
pub mod inspection;
pub mod models;
pub mod queue;
pub mod realtime;
pub mod remote;
pub mod settings;
pub mod sync;
pub mod utils;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use connectivity::{probe_loop, ConnectivityMonitor, HttpProbe, ReachabilityProbe};
use db::Database;
use events::{AppEvent, EventBus};
use inspection::InspectionController;
use queue::OperationQueue;
use remote::{HttpInspectionClient, InspectionApi, StaticToken};
use settings::SettingsStore;
use sync::{sync_loop, FlushObserver, SyncEngine};

/// Every long-lived service of the client, constructed once and shared by
/// reference. Background loops stop on [`App::shutdown`].
pub struct App {
    pub events: EventBus,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub queue: OperationQueue,
    pub sync: Arc<SyncEngine>,
    pub inspections: Arc<InspectionController>,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    pub async fn start(
        database: Database,
        api: Arc<dyn InspectionApi>,
        probe: Arc<dyn ReachabilityProbe>,
        probe_interval: Duration,
    ) -> Result<Self> {
        let events = EventBus::new();
        let connectivity = Arc::new(ConnectivityMonitor::new(probe.is_reachable().await));
        let queue = OperationQueue::new(database);
        let sync = Arc::new(SyncEngine::new(
            queue.clone(),
            api.clone(),
            connectivity.clone(),
        ));
        let inspections = Arc::new(InspectionController::new(
            queue.clone(),
            api,
            connectivity.clone(),
            sync.clone(),
            events.clone(),
        ));

        let status = sync.status().await;
        info!(
            "Starting {} with {} queued operation(s)",
            if status.online { "online" } else { "offline" },
            status.pending_count
        );
        let flush_now = status.online && status.pending_count > 0;
        events.emit(AppEvent::SyncStatusChanged(status));

        let cancel_token = CancellationToken::new();
        let observer: Arc<dyn FlushObserver> = inspections.clone();
        let mut tasks = vec![
            tokio::spawn(probe_loop(
                probe,
                connectivity.clone(),
                events.clone(),
                probe_interval,
                cancel_token.child_token(),
            )),
            tokio::spawn(sync_loop(
                sync.clone(),
                observer.clone(),
                connectivity.subscribe_edges(),
                cancel_token.child_token(),
            )),
        ];

        // Work left over from the last run while the backend was reachable.
        if flush_now {
            let sync = sync.clone();
            tasks.push(tokio::spawn(async move {
                let outcome = sync.flush(observer.as_ref()).await;
                info!("Startup flush finished: {:?}", outcome);
            }));
        }

        Ok(Self {
            events,
            connectivity,
            queue,
            sync,
            inspections,
            cancel_token,
            tasks,
        })
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!("Background task ended abnormally: {err}");
            }
        }
        info!("Shut down");
    }
}

/// Runs the sync daemon until Ctrl-C.
pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("fieldcheck starting up...");

    let data_dir = settings::data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?.get();
    let database = Database::new(data_dir.join("fieldcheck.sqlite3"))?;
    if let Some(path) = database.path() {
        info!("Offline queue stored at {}", path.display());
    }

    let tokens = Arc::new(StaticToken::new(settings.session_token.clone()));
    let api = Arc::new(HttpInspectionClient::new(
        settings.api_base_url.clone(),
        settings.request_timeout(),
        tokens,
    )?);
    let probe = Arc::new(HttpProbe::new(
        settings.health_url.clone(),
        settings.request_timeout(),
    )?);

    let app = App::start(database, api, probe, settings.probe_interval()).await?;

    let mut events = app.events.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event reporter skipped {skipped} event(s)");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match &event {
                AppEvent::SyncStatusChanged(status) => info!(
                    "Sync status: {} pending, {}{}",
                    status.pending_count,
                    if status.online { "online" } else { "offline" },
                    status
                        .last_error
                        .as_deref()
                        .map(|err| format!(", last error: {err}"))
                        .unwrap_or_default()
                ),
                AppEvent::InspectionRemapped { local, remote } => {
                    info!("Inspection {local} synced as {remote}")
                }
                other => log::debug!("{}", other.name()),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down");

    reporter.abort();
    app.shutdown().await;
    Ok(())
}
