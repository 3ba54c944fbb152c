use crate::engine::EngineError;
use crate::model::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Idle,
    Active { cursor: usize, total: usize },
}

/// Cursor over the active plan's steps.
///
/// There is no stored `Complete` state: finishing the last step clears the
/// plan and lands back in `Idle`.
#[derive(Debug, Clone, Default)]
pub struct StepEngine {
    steps: Vec<Step>,
    cursor: usize,
}

impl StepEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a plan and rewind to its first step, replacing any current plan.
    pub fn set_plan(&mut self, steps: Vec<Step>) -> Result<(), EngineError> {
        if steps.is_empty() {
            return Err(EngineError::EmptyPlan);
        }
        self.steps = steps;
        self.cursor = 0;
        Ok(())
    }

    pub fn state(&self) -> StepState {
        if self.steps.is_empty() {
            StepState::Idle
        } else {
            StepState::Active {
                cursor: self.cursor,
                total: self.steps.len(),
            }
        }
    }

    pub fn has_plan(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total(&self) -> usize {
        self.steps.len()
    }

    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    /// Move to the next step. Returns `false` when there is no next step: the
    /// plan is finished (and cleared) or there was none to begin with.
    pub fn advance(&mut self) -> bool {
        match self.state() {
            StepState::Idle => false,
            StepState::Active { cursor, total } if cursor + 1 < total => {
                self.cursor += 1;
                true
            }
            StepState::Active { .. } => {
                self.reset();
                false
            }
        }
    }

    pub fn reset(&mut self) {
        self.steps.clear();
        self.cursor = 0;
    }
}
