use super::{Planner, PlannerError};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;

/// Deterministic planner for running without a model endpoint.
///
/// Knows two recipes: rice (Rice, then Start) and everything else (Pressure
/// Cook). Answers in the same JSON shape a model would, so the output takes the
/// normal sanitize path and is filtered against what is actually visible.
#[derive(Debug, Clone, Default)]
pub struct OfflinePlanner;

#[async_trait]
impl Planner for OfflinePlanner {
    async fn plan(
        &self,
        goal: &str,
        _allowed_labels: &BTreeSet<String>,
    ) -> Result<String, PlannerError> {
        let plan = if goal.to_lowercase().contains("rice") {
            json!({
                "plan_outline": ["Select the rice program", "Start cooking"],
                "steps": [
                    {
                        "index": 0,
                        "title": "Press Rice",
                        "instruction": "Press the Rice button on the panel to select the rice program.",
                        "target_label": "rice"
                    },
                    {
                        "index": 1,
                        "title": "Press Start",
                        "instruction": "After selecting Rice, press Start to begin cooking.",
                        "target_label": "start"
                    }
                ]
            })
        } else {
            json!({
                "plan_outline": ["Select pressure cooking"],
                "steps": [
                    {
                        "index": 0,
                        "title": "Press Pressure Cook",
                        "instruction": "Select the Pressure Cook button to prepare for cooking under pressure.",
                        "target_label": "pressure cook"
                    }
                ]
            })
        };
        serde_json::to_string(&plan).map_err(|e| PlannerError::Serialization(e.to_string()))
    }
}
