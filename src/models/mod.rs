pub mod identifier;
pub mod operation;
pub mod report;

pub use identifier::InspectionId;
pub use operation::{offline_snapshot_ref, OperationKind, OperationPayload, QueuedOperation};
pub use report::{Finding, Inspection, Report, WorkflowActionResult};
