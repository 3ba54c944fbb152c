use crate::engine::labels::canon;
use crate::model::{Detection, OverlayItem, Step};

/// Pick the most confident detection of the step's target control.
///
/// Ties go to the earliest detection; NaN confidences lose to any number.
pub fn best_match(detections: &[Detection], step: &Step) -> Option<OverlayItem> {
    let mut best: Option<&Detection> = None;
    for det in detections {
        if canon(&det.label) != step.target_label {
            continue;
        }
        best = match best {
            None => Some(det),
            Some(cur) if beats(det.confidence, cur.confidence) => Some(det),
            keep => keep,
        };
    }
    best.map(|det| OverlayItem {
        bbox: Some(det.bbox),
        label: det.label.clone(),
        confidence: Some(det.confidence),
        instruction: step.title.clone(),
    })
}

fn beats(candidate: f32, current: f32) -> bool {
    candidate > current || (current.is_nan() && !candidate.is_nan())
}
