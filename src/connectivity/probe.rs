use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::events::{AppEvent, EventBus};

use super::ConnectivityMonitor;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Treats any HTTP response from the health endpoint as reachable; only a
/// transport failure counts as offline.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build probe HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(_) => true,
            Err(err) => {
                log_debug!("reachability probe failed: {err}");
                false
            }
        }
    }
}

pub async fn probe_loop(
    probe: Arc<dyn ReachabilityProbe>,
    monitor: Arc<ConnectivityMonitor>,
    events: EventBus,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reachable = probe.is_reachable().await;
                if let Some(edge) = monitor.set_online(reachable) {
                    if reachable {
                        log_info!("backend reachable again");
                    } else {
                        log_warn!("backend unreachable; new work will be queued");
                    }
                    events.emit(AppEvent::ConnectivityChanged { edge });
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("probe loop shutting down");
                break;
            }
        }
    }
}
