use std::collections::VecDeque;

/// Sliding window over "this frame shows enough controls" observations.
///
/// A single noisy frame never makes the scene stable; only a full window of
/// rich frames does.
#[derive(Debug, Clone)]
pub struct DetectionStabilizer {
    window: VecDeque<bool>,
    capacity: usize,
    threshold: usize,
}

impl DetectionStabilizer {
    pub fn new(capacity: usize, threshold: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            threshold,
        }
    }

    /// Record one frame's detection count and report stability.
    pub fn observe(&mut self, detection_count: usize) -> bool {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(detection_count >= self.threshold);
        self.is_stable()
    }

    pub fn is_stable(&self) -> bool {
        self.window.len() == self.capacity && self.window.iter().all(|rich| *rich)
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}
