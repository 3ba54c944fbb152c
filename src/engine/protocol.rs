//! Per-session dispatcher.
//!
//! Owns all state for one connection and turns each inbound event into exactly
//! one outbound message. Nothing here is async: the caller feeds events in
//! arrival order and runs any [`PlanRequest`] it is handed.

use crate::engine::acquirer::{PlanAcquirer, PlanOutcome, PlanRequest};
use crate::engine::overlay::best_match;
use crate::engine::stabilizer::DetectionStabilizer;
use crate::engine::steps::StepEngine;
use crate::engine::EngineError;
use crate::model::{Detection, GuideConfig, OutboundMessage, OverlayItem, Status};
use crate::planner::PlannerError;

/// Result of handling one frame.
#[derive(Debug)]
pub struct FrameOutcome {
    pub message: OutboundMessage,
    pub plan_request: Option<PlanRequest>,
}

#[derive(Debug)]
pub struct SessionProtocol {
    pending_query: Option<String>,
    steps: StepEngine,
    stabilizer: DetectionStabilizer,
    acquirer: PlanAcquirer,
    min_detections: usize,
}

impl SessionProtocol {
    pub fn new(cfg: &GuideConfig) -> Self {
        Self {
            pending_query: None,
            steps: StepEngine::new(),
            stabilizer: DetectionStabilizer::new(cfg.stable_frames, cfg.min_detections),
            acquirer: PlanAcquirer::new(cfg.max_steps),
            min_detections: cfg.min_detections,
        }
    }

    pub fn pending_query(&self) -> Option<&str> {
        self.pending_query.as_deref()
    }

    pub fn steps(&self) -> &StepEngine {
        &self.steps
    }

    /// Ticket of the planner request this session is still waiting on.
    pub fn in_flight_ticket(&self) -> Option<u64> {
        self.acquirer.in_flight()
    }

    pub fn on_instruction(&mut self, task: String) -> OutboundMessage {
        let task = task.trim().to_string();
        let task = (!task.is_empty()).then_some(task);
        if task != self.pending_query {
            // An answer planned for the old goal must come back stale.
            self.acquirer.cancel();
        }
        self.pending_query = task;
        OutboundMessage::new(
            Status::InstructionReceived,
            self.steps.cursor(),
            self.steps.total(),
            "Task received. Point the camera at the control panel and hold steady.",
        )
    }

    pub fn on_frame(&mut self, detections: &[Detection]) -> FrameOutcome {
        // The window sees every frame, not only the ones that may trigger.
        let stable = self.stabilizer.observe(detections.len());
        let awaiting_plan = self.pending_query.is_some() && !self.steps.has_plan();

        let mut plan_request = None;
        if awaiting_plan {
            if let Some(goal) = self.pending_query.as_deref() {
                plan_request = self.acquirer.try_begin(goal, stable, detections);
            }
        }

        let message = if detections.is_empty() {
            let hint = if self.steps.has_plan() {
                "No buttons detected. Please adjust the camera."
            } else if self.pending_query.is_some() {
                "Looking for controls… please aim the camera at the panel."
            } else {
                "No buttons detected. Please enter a task and aim the camera."
            };
            OutboundMessage::new(Status::NoObjects, self.steps.cursor(), self.steps.total(), hint)
        } else if awaiting_plan {
            let hint = if self.acquirer.in_flight().is_some() {
                "Planning your steps… keep holding steady.".to_string()
            } else {
                format!(
                    "Hold steady so at least {} buttons are clearly visible.",
                    self.min_detections
                )
            };
            OutboundMessage::new(Status::Waiting, 0, 0, hint)
        } else if let Some(step) = self.steps.current() {
            OutboundMessage::new(
                Status::Ok,
                self.steps.cursor(),
                self.steps.total(),
                step.instruction.clone(),
            )
            .with_overlay(best_match(detections, step))
        } else {
            OutboundMessage::new(
                Status::NoActiveTask,
                self.steps.cursor(),
                self.steps.total(),
                "Enter a task to begin, then point the camera at the controls.",
            )
        };

        FrameOutcome {
            message,
            plan_request,
        }
    }

    /// The user confirmed the current step is done.
    pub fn on_complete(&mut self) -> OutboundMessage {
        if !self.steps.has_plan() || self.steps.cursor() >= self.steps.total() {
            self.reset();
            return OutboundMessage::done();
        }
        if !self.steps.advance() {
            self.reset();
            return OutboundMessage::done();
        }
        match self.steps.current() {
            Some(step) => OutboundMessage::new(
                Status::Ok,
                self.steps.cursor(),
                self.steps.total(),
                step.instruction.clone(),
            )
            .with_overlay([OverlayItem::for_step(step)]),
            None => {
                self.reset();
                OutboundMessage::done()
            }
        }
    }

    /// Apply a planner answer. Answers for cancelled requests are ignored.
    pub fn on_plan_result(
        &mut self,
        ticket: u64,
        result: Result<String, PlannerError>,
    ) -> Result<PlanOutcome, EngineError> {
        let outcome = self.acquirer.complete(ticket, result);
        if let PlanOutcome::Planned { plan, .. } = &outcome {
            self.steps.set_plan(plan.steps.clone())?;
        }
        Ok(outcome)
    }

    /// Drop the task, plan, window and any outstanding planner request.
    pub fn reset(&mut self) {
        self.pending_query = None;
        self.steps.reset();
        self.stabilizer.reset();
        self.acquirer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::steps::StepState;

    fn det(label: &str, confidence: f32) -> Detection {
        Detection {
            label: label.into(),
            confidence,
            bbox: [10, 10, 40, 40],
            track_id: None,
        }
    }

    /// A frame with enough controls to count as rich.
    fn rich_frame() -> Vec<Detection> {
        let mut frame: Vec<Detection> = [
            "cancel", "decrease", "increase", "keep_warm", "lid_open", "pressure", "saute", "steam",
        ]
        .into_iter()
        .map(|label| det(label, 0.6))
        .collect();
        frame.push(det("rice", 0.8));
        frame.push(det("Rice", 0.95));
        frame.push(det("start", 0.7));
        frame
    }

    const PLAN: &str = r#"{"plan_outline": ["cook rice"], "steps": [
        {"title": "Press Rice", "instruction": "Press the Rice button.", "target_label": "rice"}
    ]}"#;

    fn planned_session() -> SessionProtocol {
        let mut session = SessionProtocol::new(&GuideConfig::default());
        session.on_instruction("cook rice".into());
        let frame = rich_frame();
        session.on_frame(&frame);
        session.on_frame(&frame);
        let request = session.on_frame(&frame).plan_request.unwrap();
        session.on_plan_result(request.ticket, Ok(PLAN.into())).unwrap();
        session
    }

    #[test]
    fn instruction_is_acknowledged_without_touching_the_plan() {
        let mut session = planned_session();
        let msg = session.on_instruction("make soup".into());
        assert_eq!(msg.status, Status::InstructionReceived);
        assert_eq!(msg.total_steps, 2);
        assert!(session.steps().has_plan());
        assert_eq!(session.pending_query(), Some("make soup"));
    }

    #[test]
    fn waits_until_the_scene_is_stable_then_requests_once() {
        let mut session = SessionProtocol::new(&GuideConfig::default());
        session.on_instruction("cook rice".into());
        let frame = rich_frame();

        let first = session.on_frame(&frame);
        assert_eq!(first.message.status, Status::Waiting);
        assert_eq!((first.message.step_index, first.message.total_steps), (0, 0));
        assert!(first.plan_request.is_none());
        assert!(session.on_frame(&frame).plan_request.is_none());

        let third = session.on_frame(&frame);
        let request = third.plan_request.expect("stable scene should trigger a plan");
        assert_eq!(third.message.status, Status::Waiting);
        assert_eq!(request.goal, "cook rice");
        assert!(request.allowed_labels.contains("rice"));

        // Still in flight: further stable frames must not ask again.
        assert!(session.on_frame(&frame).plan_request.is_none());
        assert_eq!(session.in_flight_ticket(), Some(request.ticket));
    }

    #[test]
    fn sparse_last_frame_blocks_the_trigger() {
        let mut session = SessionProtocol::new(&GuideConfig::default());
        session.on_instruction("cook rice".into());
        let rich = rich_frame();
        assert!(session.on_frame(&rich).plan_request.is_none());
        assert!(session.on_frame(&rich[..11]).plan_request.is_none());
        assert!(session.on_frame(&rich[..3]).plan_request.is_none());
        assert_eq!(session.in_flight_ticket(), None);
    }

    #[test]
    fn active_step_overlays_the_best_detection() {
        let mut session = planned_session();
        let out = session.on_frame(&rich_frame());
        assert_eq!(out.message.status, Status::Ok);
        assert_eq!(out.message.long_instruction, "Press the Rice button.");
        assert_eq!(out.message.overlay.len(), 1);
        assert_eq!(out.message.overlay[0].confidence, Some(0.95));
        assert_eq!(out.message.overlay[0].instruction, "Press Rice");
        assert!(out.plan_request.is_none());
    }

    #[test]
    fn active_step_without_its_control_in_view_has_no_overlay() {
        let mut session = planned_session();
        let out = session.on_frame(&[det("cancel", 0.9)]);
        assert_eq!(out.message.status, Status::Ok);
        assert!(out.message.overlay.is_empty());
    }

    #[test]
    fn empty_frames_pick_the_hint_by_priority() {
        let mut fresh = SessionProtocol::new(&GuideConfig::default());
        let msg = fresh.on_frame(&[]).message;
        assert_eq!(msg.status, Status::NoObjects);
        assert!(msg.long_instruction.contains("enter a task"));

        fresh.on_instruction("cook rice".into());
        assert!(fresh.on_frame(&[]).message.long_instruction.contains("Looking for controls"));

        let mut planned = planned_session();
        let msg = planned.on_frame(&[]).message;
        assert!(msg.long_instruction.contains("adjust the camera"));
        assert_eq!((msg.step_index, msg.total_steps), (0, 2));
    }

    #[test]
    fn frames_without_a_task_report_no_active_task() {
        let mut session = SessionProtocol::new(&GuideConfig::default());
        let out = session.on_frame(&rich_frame());
        assert_eq!(out.message.status, Status::NoActiveTask);
        assert!(out.plan_request.is_none());
    }

    #[test]
    fn completion_walks_to_done_and_resets() {
        let mut session = planned_session();

        let next = session.on_complete();
        assert_eq!(next.status, Status::Ok);
        assert_eq!((next.step_index, next.total_steps), (1, 2));
        assert_eq!(next.long_instruction, "Press Start to begin.");
        assert_eq!(next.overlay, vec![OverlayItem {
            bbox: None,
            label: "start".into(),
            confidence: None,
            instruction: "Start".into(),
        }]);

        let done = session.on_complete();
        assert_eq!(done, OutboundMessage::done());
        assert_eq!(session.steps().state(), StepState::Idle);
        assert_eq!(session.pending_query(), None);
    }

    #[test]
    fn completion_without_a_plan_is_done() {
        let mut session = SessionProtocol::new(&GuideConfig::default());
        session.on_instruction("cook rice".into());
        let done = session.on_complete();
        assert_eq!(done.status, Status::Done);
        assert_eq!(done.long_instruction, "Task complete!");
        assert_eq!(session.pending_query(), None);
    }

    #[test]
    fn reset_discards_the_outstanding_plan_request() {
        let mut session = SessionProtocol::new(&GuideConfig::default());
        session.on_instruction("cook rice".into());
        let frame = rich_frame();
        session.on_frame(&frame);
        session.on_frame(&frame);
        let request = session.on_frame(&frame).plan_request.unwrap();

        session.on_complete();
        assert_eq!(session.in_flight_ticket(), None);

        let outcome = session.on_plan_result(request.ticket, Ok(PLAN.into())).unwrap();
        assert!(matches!(outcome, PlanOutcome::Stale));
        assert!(!session.steps().has_plan());
    }

    #[test]
    fn new_goal_discards_the_answer_for_the_old_one() {
        let mut session = SessionProtocol::new(&GuideConfig::default());
        session.on_instruction("cook rice".into());
        let frame = rich_frame();
        session.on_frame(&frame);
        session.on_frame(&frame);
        let request = session.on_frame(&frame).plan_request.unwrap();

        session.on_instruction("pressure cook beans".into());
        assert_eq!(session.in_flight_ticket(), None);

        let outcome = session.on_plan_result(request.ticket, Ok(PLAN.into())).unwrap();
        assert!(matches!(outcome, PlanOutcome::Stale));
        assert!(!session.steps().has_plan());

        let next = session.on_frame(&frame);
        assert_eq!(next.message.status, Status::Waiting);
        let retry = next.plan_request.expect("the new goal should be planned");
        assert_eq!(retry.goal, "pressure cook beans");
        assert!(retry.ticket > request.ticket);
    }

    #[test]
    fn repeating_the_same_goal_keeps_the_request() {
        let mut session = SessionProtocol::new(&GuideConfig::default());
        session.on_instruction("cook rice".into());
        let frame = rich_frame();
        session.on_frame(&frame);
        session.on_frame(&frame);
        let request = session.on_frame(&frame).plan_request.unwrap();

        session.on_instruction("  cook rice ".into());
        assert_eq!(session.in_flight_ticket(), Some(request.ticket));
    }

    #[test]
    fn failed_plans_leave_the_session_waiting() {
        let mut session = SessionProtocol::new(&GuideConfig::default());
        session.on_instruction("cook rice".into());
        let frame = rich_frame();
        session.on_frame(&frame);
        session.on_frame(&frame);
        let request = session.on_frame(&frame).plan_request.unwrap();
        let outcome = session
            .on_plan_result(request.ticket, Err(PlannerError::Timeout(std::time::Duration::from_secs(20))))
            .unwrap();
        assert!(matches!(outcome, PlanOutcome::Failed(_)));

        let out = session.on_frame(&frame);
        assert_eq!(out.message.status, Status::Waiting);
        assert!(out.plan_request.is_some(), "a stable scene retries after a failure");
    }

    #[test]
    fn cursor_stays_within_bounds_across_a_session() {
        let mut session = planned_session();
        let frame = rich_frame();
        for _ in 0..5 {
            for msg in [session.on_frame(&frame).message, session.on_complete()] {
                assert!(msg.step_index <= msg.total_steps);
            }
            assert!(session.steps().cursor() <= session.steps().total());
        }
    }
}
