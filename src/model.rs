use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pixel-space box as `[x1, y1, x2, y2]`.
pub type BBox = [i32; 4];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideConfig {
    /// Consecutive rich frames required before a plan is requested.
    pub stable_frames: usize,
    /// Detections per frame for the frame to count as rich.
    pub min_detections: usize,
    pub max_steps: usize,
    #[serde(with = "humantime_serde")]
    pub planner_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub detector_timeout: Duration,
    pub event_queue_depth: usize,
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            stable_frames: 3,
            min_detections: 10,
            max_steps: 8,
            planner_timeout: Duration::from_secs(20),
            detector_timeout: Duration::from_secs(5),
            event_queue_depth: 32,
        }
    }
}

/// One frame-local observation of a control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
    #[serde(default)]
    pub track_id: Option<i64>,
}

/// One validated, instructed action. Only built by the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub title: String,
    pub instruction: String,
    pub target_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub outline: Vec<String>,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    InstructionReceived,
    NoObjects,
    Waiting,
    NoActiveTask,
    Ok,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayItem {
    pub bbox: Option<BBox>,
    pub label: String,
    pub confidence: Option<f32>,
    pub instruction: String,
}

impl OverlayItem {
    /// Overlay entry for a step when no fresh detection is available.
    pub fn for_step(step: &Step) -> Self {
        Self {
            bbox: None,
            label: step.target_label.clone(),
            confidence: None,
            instruction: step.title.clone(),
        }
    }
}

/// The single outbound message shape, sent once per handled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub status: Status,
    pub overlay: Vec<OverlayItem>,
    pub step_index: usize,
    pub total_steps: usize,
    pub long_instruction: String,
}

impl OutboundMessage {
    pub fn new(
        status: Status,
        step_index: usize,
        total_steps: usize,
        long_instruction: impl Into<String>,
    ) -> Self {
        Self {
            status,
            overlay: Vec::new(),
            step_index,
            total_steps,
            long_instruction: long_instruction.into(),
        }
    }

    pub fn with_overlay(mut self, overlay: impl IntoIterator<Item = OverlayItem>) -> Self {
        self.overlay = overlay.into_iter().collect();
        self
    }

    pub fn done() -> Self {
        Self::new(Status::Done, 0, 0, "Task complete!")
    }
}

/// Text messages accepted on the session channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Instruction {
        #[serde(default)]
        task: String,
    },
    StepComplete,
}

impl InboundMessage {
    /// Parse a text payload; anything unrecognised yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
