mod controller;
mod state;

pub use controller::{InspectionController, InspectionResult};
pub use state::{
    transition, Effect, InspectionError, InspectionSession, SessionEvent, SessionStatus,
    Transition,
};
