use crate::engine::labels::canon;
use crate::engine::sanitize::{sanitize, RecoveryStage};
use crate::model::{Detection, Plan};
use crate::planner::PlannerError;
use std::collections::BTreeSet;

/// A planner call the session wants made. The ticket identifies the answer
/// when it comes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRequest {
    pub ticket: u64,
    pub goal: String,
    pub allowed_labels: BTreeSet<String>,
}

#[derive(Debug)]
pub enum PlanOutcome {
    Planned { plan: Plan, stage: RecoveryStage },
    /// The planner answered but nothing survived sanitizing.
    Empty { stage: RecoveryStage },
    Failed(PlannerError),
    /// Answer to a request that was cancelled or superseded.
    Stale,
}

#[derive(Debug)]
struct InFlight {
    ticket: u64,
    goal: String,
    allowed: BTreeSet<String>,
}

/// Exactly-once bookkeeping for planner calls. At most one request is in
/// flight; tickets only ever increase, so a late answer cannot be mistaken
/// for a newer request's.
#[derive(Debug)]
pub struct PlanAcquirer {
    in_flight: Option<InFlight>,
    next_ticket: u64,
    max_steps: usize,
}

impl PlanAcquirer {
    pub fn new(max_steps: usize) -> Self {
        Self {
            in_flight: None,
            next_ticket: 0,
            max_steps,
        }
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|pending| pending.ticket)
    }

    /// Issue a request if the scene is stable and nothing is outstanding.
    pub fn try_begin(
        &mut self,
        goal: &str,
        stable: bool,
        detections: &[Detection],
    ) -> Option<PlanRequest> {
        if !stable || self.in_flight.is_some() {
            return None;
        }
        let allowed = allowed_labels(detections);
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight = Some(InFlight {
            ticket,
            goal: goal.to_string(),
            allowed: allowed.clone(),
        });
        Some(PlanRequest {
            ticket,
            goal: goal.to_string(),
            allowed_labels: allowed,
        })
    }

    /// Settle the outstanding request with the planner's answer.
    pub fn complete(&mut self, ticket: u64, result: Result<String, PlannerError>) -> PlanOutcome {
        if self.in_flight() != Some(ticket) {
            return PlanOutcome::Stale;
        }
        let Some(pending) = self.in_flight.take() else {
            return PlanOutcome::Stale;
        };
        let raw = match result {
            Ok(raw) => raw,
            Err(err) => return PlanOutcome::Failed(err),
        };
        let sanitized = sanitize(&raw, &pending.goal, &pending.allowed, self.max_steps);
        if sanitized.plan.is_empty() {
            PlanOutcome::Empty {
                stage: sanitized.stage,
            }
        } else {
            PlanOutcome::Planned {
                plan: sanitized.plan,
                stage: sanitized.stage,
            }
        }
    }

    /// Forget the outstanding request; its answer will come back `Stale`.
    pub fn cancel(&mut self) -> Option<u64> {
        self.in_flight.take().map(|pending| pending.ticket)
    }
}

/// Canonical labels of every labelled detection in the frame.
pub fn allowed_labels(detections: &[Detection]) -> BTreeSet<String> {
    detections
        .iter()
        .filter(|det| !det.label.trim().is_empty())
        .map(|det| canon(&det.label))
        .collect()
}
