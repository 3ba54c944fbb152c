//! Per-connection session actor.
//!
//! Owns one [`SessionProtocol`] and feeds it events strictly in arrival order.
//! Planner calls run as separate tasks; their answers come back through the
//! same event queue, so they are ordered like everything else.

use crate::detector::Detector;
use crate::engine::{PlanOutcome, PlanRequest, SessionProtocol};
use crate::model::{Detection, GuideConfig, OutboundMessage};
use crate::planner::{Planner, PlannerError};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Events for one session.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Instruction(String),
    Frame(Bytes),
    /// Step completion. The answer goes to `reply` when present, otherwise
    /// out on the session channel.
    Complete {
        reply: Option<oneshot::Sender<OutboundMessage>>,
    },
    PlanReady {
        ticket: u64,
        result: Result<String, PlannerError>,
    },
}

/// Collaborators and settings shared by every session.
pub(crate) struct SessionDeps {
    pub detector: Arc<dyn Detector>,
    pub planner: Arc<dyn Planner>,
    pub cfg: GuideConfig,
}

/// Handle for a running planner task.
struct PlanCtx {
    ticket: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PlanCtx {
    fn stop(self) {
        self.cancel.cancel();
        // Dropping a JoinHandle does not stop the task; abort it explicitly.
        self.handle.abort();
    }
}

/// Run the planner off the session loop and post the answer back as an event.
/// The queue is held weakly: a closed session simply drops the answer.
fn spawn_plan(
    planner: Arc<dyn Planner>,
    request: PlanRequest,
    timeout: Duration,
    events: mpsc::WeakSender<SessionEvent>,
) -> PlanCtx {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let ticket = request.ticket;
    let handle = tokio::spawn(async move {
        let result = tokio::select! {
            _ = token.cancelled() => return,
            res = tokio::time::timeout(timeout, planner.plan(&request.goal, &request.allowed_labels)) => {
                res.unwrap_or_else(|_| Err(PlannerError::Timeout(timeout)))
            }
        };
        if let Some(tx) = events.upgrade() {
            let _ = tx.send(SessionEvent::PlanReady { ticket, result }).await;
        }
    });
    PlanCtx {
        ticket,
        cancel,
        handle,
    }
}

async fn detect_frame(detector: &dyn Detector, frame: Bytes, session_id: &str) -> Vec<Detection> {
    match detector.detect(frame).await {
        Ok(detections) => detections,
        Err(err) => {
            warn!(session = %session_id, error = %err, "detection failed, treating frame as empty");
            Vec::new()
        }
    }
}

fn apply_plan_result(
    protocol: &mut SessionProtocol,
    session_id: &str,
    ticket: u64,
    result: Result<String, PlannerError>,
) {
    match protocol.on_plan_result(ticket, result) {
        Ok(PlanOutcome::Planned { plan, stage }) => info!(
            session = %session_id,
            ticket,
            steps = plan.steps.len(),
            ?stage,
            outline = ?plan.outline,
            "plan ready"
        ),
        Ok(PlanOutcome::Empty { stage }) => {
            warn!(session = %session_id, ticket, ?stage, "planner answer had no usable steps")
        }
        Ok(PlanOutcome::Failed(err)) => {
            warn!(session = %session_id, ticket, error = %err, "planner failed")
        }
        Ok(PlanOutcome::Stale) => {
            debug!(session = %session_id, ticket, "discarding stale planner answer")
        }
        Err(err) => warn!(session = %session_id, ticket, error = %err, "could not install plan"),
    }
}

/// Drive one session until its event queue closes or `shutdown` fires.
pub(crate) async fn run_session(
    session_id: String,
    deps: Arc<SessionDeps>,
    mut event_rx: mpsc::Receiver<SessionEvent>,
    events: mpsc::WeakSender<SessionEvent>,
    out_tx: mpsc::UnboundedSender<OutboundMessage>,
    shutdown: CancellationToken,
) {
    let mut protocol = SessionProtocol::new(&deps.cfg);
    let mut plan_ctx: Option<PlanCtx> = None;
    info!(session = %session_id, "session opened");

    loop {
        let event = tokio::select! {
            ev = event_rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        match event {
            SessionEvent::Instruction(task) => {
                info!(session = %session_id, task = %task, "instruction received");
                let _ = out_tx.send(protocol.on_instruction(task));
            }
            SessionEvent::Frame(frame) => {
                let detections = detect_frame(deps.detector.as_ref(), frame, &session_id).await;
                let outcome = protocol.on_frame(&detections);
                if let Some(request) = outcome.plan_request {
                    info!(
                        session = %session_id,
                        ticket = request.ticket,
                        labels = ?request.allowed_labels,
                        "scene stable, requesting plan"
                    );
                    let ctx = spawn_plan(
                        deps.planner.clone(),
                        request,
                        deps.cfg.planner_timeout,
                        events.clone(),
                    );
                    if let Some(old) = plan_ctx.replace(ctx) {
                        old.stop();
                    }
                }
                let _ = out_tx.send(outcome.message);
            }
            SessionEvent::Complete { reply } => {
                let msg = protocol.on_complete();
                debug!(session = %session_id, status = ?msg.status, step = msg.step_index, "step completion handled");
                match reply {
                    Some(tx) => {
                        let _ = tx.send(msg);
                    }
                    None => {
                        let _ = out_tx.send(msg);
                    }
                }
            }
            SessionEvent::PlanReady { ticket, result } => {
                apply_plan_result(&mut protocol, &session_id, ticket, result);
            }
        }

        // A reset inside the protocol orphans the running planner call.
        if let Some(ctx) = plan_ctx.take() {
            if protocol.in_flight_ticket() == Some(ctx.ticket) {
                plan_ctx = Some(ctx);
            } else {
                ctx.stop();
            }
        }
    }

    if let Some(ctx) = plan_ctx.take() {
        debug!(session = %session_id, ticket = ctx.ticket, "cancelling planner on session close");
        ctx.stop();
    }
    info!(session = %session_id, "session closed");
}
