//! The guidance core: everything between "these controls are visible" and
//! "press this one next". Synchronous and free of I/O; the orchestrator drives it.

pub mod acquirer;
pub mod labels;
pub mod overlay;
pub mod protocol;
pub mod sanitize;
pub mod stabilizer;
pub mod steps;

pub use acquirer::{PlanOutcome, PlanRequest};
pub use protocol::SessionProtocol;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a plan needs at least one step")]
    EmptyPlan,
}
