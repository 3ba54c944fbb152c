//! Raw planner output -> validated [`Plan`].
//!
//! Planner text is untrusted. It goes through an ordered recovery ladder, each
//! rung deterministic and tried only when the previous one produced nothing:
//!
//! 1. strict JSON parse of the whole text
//! 2. parse of the first balanced `{ ... }` object
//! 3. the same object after light repair (single quotes, trailing commas)
//! 4. `Step N: description -> button` lines
//! 5. goal keyword heuristics against the allowed labels
//!
//! Whatever the ladder yields is then filtered against the allowed labels,
//! re-indexed, capped, and given a trailing Start step where one fits.

use crate::engine::labels::canon;
use crate::model::{Plan, Step};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::LazyLock;

pub const START_LABEL: &str = "start";

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma regex"));

static STEP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*step\s*\d+\s*[:.)\-]\s*(.+?)\s*->\s*(\S.*?)\s*$").expect("step line regex")
});

/// Goal keywords, the control they imply, and the step to show for it.
const KEYWORD_STEPS: &[(&[&str], &str, &str, &str)] = &[
    (&["rice"], "rice", "Press Rice", "Press the Rice button."),
    (
        &["pressure"],
        "pressure_cook",
        "Press Pressure Cook",
        "Press the Pressure Cook button.",
    ),
    (&["steam"], "steam", "Press Steam", "Press the Steam button."),
    (&["saute", "sauté"], "saute", "Press Sauté", "Press the Sauté button."),
    (
        &["keep warm", "warm"],
        "keep_warm",
        "Press Keep Warm",
        "Press the Keep Warm button.",
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    Strict,
    Extracted,
    Repaired,
    TextPattern,
    Keyword,
    Nothing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStep {
    pub title: Option<String>,
    pub instruction: Option<String>,
    pub target_label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPlan {
    pub outline: Vec<String>,
    pub steps: Vec<RawStep>,
}

#[derive(Debug, Clone)]
pub struct Sanitized {
    pub plan: Plan,
    pub stage: RecoveryStage,
}

/// Run the full ladder and validation over one planner response.
pub fn sanitize(
    raw_text: &str,
    goal: &str,
    allowed: &BTreeSet<String>,
    max_steps: usize,
) -> Sanitized {
    let (raw, mut stage) = recover(raw_text).unwrap_or((RawPlan::default(), RecoveryStage::Nothing));

    let mut kept = validate(&raw.steps, allowed);
    if kept.is_empty() {
        kept = validate(&keyword_steps(goal, allowed), allowed);
        if !kept.is_empty() {
            stage = RecoveryStage::Keyword;
        }
    }

    let needs_start = kept
        .last()
        .is_some_and(|last| last.target_label != START_LABEL && allowed.contains(START_LABEL));
    if needs_start {
        kept.push(Step {
            index: kept.len(),
            title: "Start".into(),
            instruction: "Press Start to begin.".into(),
            target_label: START_LABEL.into(),
        });
    }
    kept.truncate(max_steps);

    let steps: Vec<Step> = kept
        .into_iter()
        .enumerate()
        .map(|(index, step)| Step { index, ..step })
        .collect();

    let outline = if steps.is_empty() {
        Vec::new()
    } else if raw.outline.is_empty() || stage == RecoveryStage::Keyword {
        // A keyword plan replaces the planner's steps, so its outline no longer applies.
        steps.iter().map(|s| s.title.clone()).collect()
    } else {
        raw.outline.into_iter().take(max_steps).collect()
    };

    Sanitized {
        plan: Plan { outline, steps },
        stage,
    }
}

/// Rungs 1-4 of the ladder. `None` when nothing usable was found.
pub fn recover(text: &str) -> Option<(RawPlan, RecoveryStage)> {
    if let Some(obj) = parse_object(text) {
        return Some((raw_plan_from(&obj), RecoveryStage::Strict));
    }
    if let Some(candidate) = extract_balanced_object(text) {
        if let Some(obj) = parse_object(candidate) {
            return Some((raw_plan_from(&obj), RecoveryStage::Extracted));
        }
        if let Some(obj) = parse_object(&light_repair(candidate)) {
            return Some((raw_plan_from(&obj), RecoveryStage::Repaired));
        }
    }
    let steps = text_pattern_steps(text);
    if steps.is_empty() {
        None
    } else {
        Some((
            RawPlan {
                outline: Vec::new(),
                steps,
            },
            RecoveryStage::TextPattern,
        ))
    }
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// First `{` up to its matching `}` by plain brace counting.
fn extract_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn light_repair(text: &str) -> String {
    let quoted = text.replace('\'', "\"");
    TRAILING_COMMA.replace_all(&quoted, "$1").into_owned()
}

fn text_pattern_steps(text: &str) -> Vec<RawStep> {
    STEP_LINE
        .captures_iter(text)
        .map(|caps| {
            let description = caps[1].to_string();
            RawStep {
                title: Some(description.clone()),
                instruction: Some(description),
                target_label: Some(caps[2].to_string()),
            }
        })
        .collect()
}

fn keyword_steps(goal: &str, allowed: &BTreeSet<String>) -> Vec<RawStep> {
    let goal = goal.to_lowercase();
    KEYWORD_STEPS
        .iter()
        .find(|(keywords, label, _, _)| {
            allowed.contains(*label) && keywords.iter().any(|k| goal.contains(k))
        })
        .map(|(_, label, title, instruction)| RawStep {
            title: Some((*title).into()),
            instruction: Some((*instruction).into()),
            target_label: Some((*label).into()),
        })
        .into_iter()
        .collect()
}

fn raw_plan_from(obj: &Map<String, Value>) -> RawPlan {
    let outline = match obj.get("plan_outline") {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        _ => Vec::new(),
    };
    let steps = match obj.get("steps") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .map(|step| RawStep {
                title: first_field(step, &["title", "short_instruction", "step"]),
                instruction: first_field(step, &["instruction", "long_instruction", "long_step"]),
                target_label: first_field(step, &["target_label", "button_label"]),
            })
            .collect(),
        _ => Vec::new(),
    };
    RawPlan { outline, steps }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn first_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| obj.get(*key).and_then(scalar_text))
        .find(|text| !text.trim().is_empty())
}

/// Keep steps whose title is present and whose target is allowed.
/// Indices are provisional; the caller re-indexes.
fn validate(raw: &[RawStep], allowed: &BTreeSet<String>) -> Vec<Step> {
    raw.iter()
        .filter_map(|step| {
            let title = step.title.as_deref().unwrap_or_default().trim();
            let target = canon(step.target_label.as_deref().unwrap_or_default());
            if title.is_empty() || !allowed.contains(&target) {
                return None;
            }
            let instruction = step
                .instruction
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .unwrap_or(title);
            Some(Step {
                index: 0,
                title: title.to_string(),
                instruction: instruction.to_string(),
                target_label: target,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(labels: &[&str]) -> BTreeSet<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    fn targets(plan: &Plan) -> Vec<&str> {
        plan.steps.iter().map(|s| s.target_label.as_str()).collect()
    }

    #[test]
    fn drops_unknown_targets_and_appends_start() {
        let raw = r#"{
            "plan_outline": [],
            "steps": [
                {"index": 4, "title": "Press Rice", "instruction": "Press the Rice button.", "target_label": "Rice"},
                {"index": 9, "title": "Begin cooking", "instruction": "Begin.", "target_label": "begin"}
            ]
        }"#;
        let out = sanitize(raw, "cook rice", &allowed(&["rice", "start", "cancel"]), 8);
        assert_eq!(out.stage, RecoveryStage::Strict);
        assert_eq!(targets(&out.plan), vec!["rice", "start"]);
        let indices: Vec<usize> = out.plan.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(out.plan.steps[1].title, "Start");
        assert_eq!(out.plan.steps[1].instruction, "Press Start to begin.");
        assert_eq!(out.plan.outline, vec!["Press Rice", "Start"]);
    }

    #[test]
    fn does_not_duplicate_a_trailing_start() {
        let raw = r#"{"steps": [
            {"title": "Press Rice", "target_label": "rice"},
            {"title": "Press Start", "target_label": "START"}
        ]}"#;
        let out = sanitize(raw, "rice", &allowed(&["rice", "start"]), 8);
        assert_eq!(targets(&out.plan), vec!["rice", "start"]);
    }

    #[test]
    fn missing_instruction_falls_back_to_title_and_empty_titles_drop() {
        let raw = r#"{"steps": [
            {"title": "   ", "target_label": "rice"},
            {"title": "Steam it", "target_label": "steam"}
        ]}"#;
        let out = sanitize(raw, "steam veg", &allowed(&["rice", "steam"]), 8);
        assert_eq!(out.plan.steps.len(), 1);
        assert_eq!(out.plan.steps[0].instruction, "Steam it");
        assert_eq!(out.plan.steps[0].index, 0);
    }

    #[test]
    fn extracts_object_from_chatty_text() {
        let raw = "Sure! Here is the plan:\n```json\n{\"steps\": [{\"title\": \"Press Steam\", \"target_label\": \"steam\"}]}\n```\nHope it helps {:)";
        let out = sanitize(raw, "steam", &allowed(&["steam"]), 8);
        assert_eq!(out.stage, RecoveryStage::Extracted);
        assert_eq!(targets(&out.plan), vec!["steam"]);
    }

    #[test]
    fn repairs_single_quotes_and_trailing_commas() {
        let raw = "plan: {'steps': [{'title': 'Press Pressure Cook', 'target_label': 'pressure cook',},],}";
        let out = sanitize(raw, "beans", &allowed(&["pressure_cook"]), 8);
        assert_eq!(out.stage, RecoveryStage::Repaired);
        assert_eq!(targets(&out.plan), vec!["pressure_cook"]);
    }

    #[test]
    fn falls_back_to_step_lines() {
        let raw = "Step 1: Press the Pressure Cook button -> Pressure Cook\nstep 2) Hit start -> start\nthen wait";
        let out = sanitize(raw, "beans", &allowed(&["pressure_cook", "start"]), 8);
        assert_eq!(out.stage, RecoveryStage::TextPattern);
        assert_eq!(targets(&out.plan), vec!["pressure_cook", "start"]);
        assert_eq!(out.plan.steps[0].title, "Press the Pressure Cook button");
    }

    #[test]
    fn falls_back_to_goal_keywords() {
        let out = sanitize("I cannot help with that.", "Make RICE please", &allowed(&["rice", "start"]), 8);
        assert_eq!(out.stage, RecoveryStage::Keyword);
        assert_eq!(targets(&out.plan), vec!["rice", "start"]);
        assert_eq!(out.plan.steps[0].title, "Press Rice");
    }

    #[test]
    fn keyword_fallback_also_covers_fully_dropped_plans() {
        let raw = r#"{"steps": [{"title": "Press Bake", "target_label": "bake"}]}"#;
        let out = sanitize(raw, "rice", &allowed(&["rice"]), 8);
        assert_eq!(out.stage, RecoveryStage::Keyword);
        assert_eq!(targets(&out.plan), vec!["rice"]);
    }

    #[test]
    fn keyword_plans_outline_their_own_steps() {
        let raw = r#"{"plan_outline": ["Bake the bread"], "steps": [{"title": "Press Bake", "target_label": "bake"}]}"#;
        let out = sanitize(raw, "rice", &allowed(&["rice", "start"]), 8);
        assert_eq!(out.stage, RecoveryStage::Keyword);
        assert_eq!(out.plan.outline, vec!["Press Rice", "Start"]);
    }

    #[test]
    fn nothing_usable_yields_an_empty_plan() {
        let out = sanitize("no json here", "bake bread", &allowed(&["rice", "start"]), 8);
        assert_eq!(out.stage, RecoveryStage::Nothing);
        assert!(out.plan.is_empty());
        assert!(out.plan.outline.is_empty());
    }

    #[test]
    fn caps_steps_and_outline() {
        let steps: Vec<String> = (0..12)
            .map(|i| format!(r#"{{"title": "Bump {i}", "target_label": "increase"}}"#))
            .collect();
        let outline: Vec<String> = (0..12).map(|i| format!("\"part {i}\"")).collect();
        let raw = format!(
            r#"{{"plan_outline": [{}], "steps": [{}]}}"#,
            outline.join(","),
            steps.join(",")
        );
        let out = sanitize(&raw, "hotter", &allowed(&["increase", "start"]), 8);
        assert_eq!(out.plan.steps.len(), 8);
        assert_eq!(out.plan.outline.len(), 8);
        assert_eq!(out.plan.steps[7].index, 7);
        assert_eq!(out.plan.steps[7].target_label, "increase");
    }

    #[test]
    fn accepts_legacy_field_names() {
        let raw = r#"{"steps": [{"step": "Press Rice", "long_step": "Press Rice now.", "button_label": "rice"}]}"#;
        let out = sanitize(raw, "", &allowed(&["rice"]), 8);
        assert_eq!(out.plan.steps[0].instruction, "Press Rice now.");
    }

    #[test]
    fn balanced_extraction_stops_at_the_matching_brace() {
        assert_eq!(
            extract_balanced_object("x {\"a\": {\"b\": 1}} y {\"c\": 2}"),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_balanced_object("{ never closed"), None);
        assert_eq!(extract_balanced_object("no braces"), None);
    }
}
