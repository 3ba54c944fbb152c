use super::{truncate_for_log, Planner, PlannerError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

const MAX_LOG_CHARS: usize = 4_000;

const SYSTEM_PROMPT: &str = "You guide a user through operating an appliance control panel, \
one button press at a time. You only know the buttons you are told are visible. \
Never invent buttons or steps. Output JSON only.";

#[derive(Debug, Clone)]
pub struct ChatPlannerConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for ChatPlannerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            timeout: Duration::from_secs(20),
        }
    }
}

/// Planner backed by an OpenAI-compatible chat-completions endpoint.
pub struct ChatPlanner {
    client: reqwest::Client,
    config: ChatPlannerConfig,
}

impl ChatPlanner {
    pub fn new(config: ChatPlannerConfig) -> Result<Self, PlannerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("panel-guide/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlannerError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn headers(&self) -> Result<HeaderMap, PlannerError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| PlannerError::Http(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

/// User turn: the goal, the allowed labels, and the exact shape to answer in.
pub(crate) fn build_user_prompt(goal: &str, allowed_labels: &BTreeSet<String>) -> String {
    let allowed: Vec<&str> = allowed_labels.iter().map(String::as_str).collect();
    let allowed_json = serde_json::to_string(&allowed).unwrap_or_else(|_| "[]".into());
    format!(
        "User goal: \"{goal}\"\n\
         Allowed button labels (target_label must be one of these): {allowed_json}\n\n\
         Respond with JSON in exactly this shape:\n\
         {{\n  \"plan_outline\": [\"short description of the plan\"],\n  \"steps\": [\n    \
         {{ \"index\": 0, \"title\": \"short step title\", \"instruction\": \"longer step instruction\", \
         \"target_label\": \"one label from the allowed list\" }}\n  ]\n}}\n\n\
         Rules:\n\
         - Use only labels from the allowed list.\n\
         - Keep the plan minimal and practical (1-3 steps).\n\
         - Index starts at 0 and increases by 1.\n\
         - If 'start' is allowed and needed, finish with a step whose target_label is 'start'.\n\
         - Output only JSON, no text around it.\n\n\
         If no plan is possible, return {{\"plan_outline\": [], \"steps\": []}}"
    )
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Planner for ChatPlanner {
    async fn plan(
        &self,
        goal: &str,
        allowed_labels: &BTreeSet<String>,
    ) -> Result<String, PlannerError> {
        let user = build_user_prompt(goal, allowed_labels);
        info!(
            model = %self.config.model,
            goal_len = goal.len(),
            label_count = allowed_labels.len(),
            "planner request prepared"
        );
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(user_prompt = %truncate_for_log(&user, MAX_LOG_CHARS), "planner prompt");
        }

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlannerError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PlannerError::Response(format!(
                "HTTP {}: {}",
                status,
                truncate_for_log(&text, 200)
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| PlannerError::Http(e.to_string()))?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| PlannerError::Serialization(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PlannerError::Response("missing choices".to_string()))?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(raw = %truncate_for_log(&content, MAX_LOG_CHARS), "planner raw output");
        }
        Ok(content)
    }
}
