//! Session lifecycle.
//!
//! Each connection gets one actor task ([`run_session`]) that owns its
//! protocol state and drains a bounded event queue. The registry maps session
//! ids to those queues so HTTP callers can reach a live session.

mod controller;
mod registry;

pub(crate) use controller::{run_session, SessionDeps, SessionEvent};
pub(crate) use registry::{gen_session_id, SessionInfo, SessionRegistry};

#[cfg(test)]
pub(crate) use controller::tests::{FixedDetector, SlowPlanner};
