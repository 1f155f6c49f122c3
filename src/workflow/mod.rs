//! Multi-step contract approval workflow.

pub mod engine;
pub mod errors;
pub mod status;
pub mod transition;
pub mod types;


pub use engine::{Decision, WorkflowEngine, WorkflowHistory};
pub use errors::WorkflowError;
pub use status::{DecisionAction, InstanceStatus, RequestType};
pub use types::{Actor, Outcome};
