//! Replays the operation queue against the backend once it is reachable.

mod engine;
mod worker;

pub use engine::{FlushObserver, FlushOutcome, IdentifierMapping, NoopObserver, SyncEngine, SyncStatus};
pub use worker::sync_loop;
