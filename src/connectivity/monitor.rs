use serde::Serialize;
use tokio::sync::{broadcast, watch};

const EDGE_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectivityEdge {
    WentOnline,
    WentOffline,
}

/// Current reachability of the backend. Every transition is broadcast as an
/// edge, so a subscriber sees each flip even when they arrive back to back.
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    edges: broadcast::Sender<ConnectivityEdge>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        let (edges, _) = broadcast::channel(EDGE_CHANNEL_CAPACITY);
        Self { state, edges }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub fn is_offline(&self) -> bool {
        !self.is_online()
    }

    /// Records a reachability observation and reports the edge it caused.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEdge> {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        let edge = match (changed, online) {
            (false, _) => return None,
            (true, true) => ConnectivityEdge::WentOnline,
            (true, false) => ConnectivityEdge::WentOffline,
        };
        // no subscribers is fine
        let _ = self.edges.send(edge);
        Some(edge)
    }

    pub fn subscribe_edges(&self) -> broadcast::Receiver<ConnectivityEdge> {
        self.edges.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transitions_produce_edges() {
        let monitor = ConnectivityMonitor::new(true);
        assert_eq!(monitor.set_online(true), None);
        assert_eq!(monitor.set_online(false), Some(ConnectivityEdge::WentOffline));
        assert_eq!(monitor.set_online(false), None);
        assert!(monitor.is_offline());
        assert_eq!(monitor.set_online(true), Some(ConnectivityEdge::WentOnline));
    }

    #[tokio::test]
    async fn subscribers_see_every_flip() {
        let monitor = ConnectivityMonitor::new(true);
        let mut rx = monitor.subscribe_edges();

        monitor.set_online(true);
        monitor.set_online(false);
        monitor.set_online(true);

        assert_eq!(rx.recv().await.unwrap(), ConnectivityEdge::WentOffline);
        assert_eq!(rx.recv().await.unwrap(), ConnectivityEdge::WentOnline);
        assert!(rx.try_recv().is_err());
    }
}
