use serde::Serialize;
use tokio::sync::broadcast;

use crate::connectivity::ConnectivityEdge;
use crate::inspection::InspectionSession;
use crate::models::{InspectionId, Report};
use crate::sync::SyncStatus;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum AppEvent {
    InspectionStateChanged(InspectionSession),
    #[serde(rename_all = "camelCase")]
    InspectionRemapped { local: InspectionId, remote: InspectionId },
    ReportGenerated(Report),
    SyncStatusChanged(SyncStatus),
    #[serde(rename_all = "camelCase")]
    ConnectivityChanged { edge: ConnectivityEdge },
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::InspectionStateChanged(_) => "inspection-state-changed",
            AppEvent::InspectionRemapped { .. } => "inspection-remapped",
            AppEvent::ReportGenerated(_) => "report-generated",
            AppEvent::SyncStatusChanged(_) => "sync-status-changed",
            AppEvent::ConnectivityChanged { .. } => "connectivity-changed",
        }
    }
}

/// Fan-out of state changes to whatever renders them. Emitting never blocks
/// and never fails; slow observers lose the oldest events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn emit(&self, event: AppEvent) {
        log::debug!("emitting {}", event.name());
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_kebab_names() {
        let event = AppEvent::ConnectivityChanged {
            edge: ConnectivityEdge::WentOnline,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["data"]["edge"], "wentOnline");
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(AppEvent::ConnectivityChanged {
            edge: ConnectivityEdge::WentOffline,
        });
    }
}
