pub mod monitor;
pub mod probe;

pub use monitor::{ConnectivityEdge, ConnectivityMonitor};
pub use probe::{probe_loop, HttpProbe, ReachabilityProbe};
