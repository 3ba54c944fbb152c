//! Goal + visible controls -> raw step plan.
//!
//! Planners return the model's raw text. Nothing they say is trusted until it
//! has been through [`crate::engine::sanitize`].

mod chat;
mod offline;

pub use chat::{ChatPlanner, ChatPlannerConfig};
pub use offline::OfflinePlanner;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, goal: &str, allowed_labels: &BTreeSet<String>)
        -> Result<String, PlannerError>;
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("planner timed out after {0:?}")]
    Timeout(Duration),
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}
