//! OpenAI-compatible chat-completions Oracle for homesim.
//!
//! Each Oracle call renders its prompt template, sends it as a single user turn after a
//! fixed system message, and returns the first choice's content untouched. Parsing is left
//! to the engine.

use homesim_core::{
    DailyPlanRequest, Oracle, OracleError, PlannedActivity, RevisionRequest, StepOutRequest,
    WaitingRequest,
};
use reqwest::blocking::Client;
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

mod prompt;

pub use prompt::{PromptError, PromptKind, PromptTemplates};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
const SYSTEM_PROMPT: &str = "You are a helpful assistant";

/// Endpoint and sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Base URL up to and including the version segment, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: 0.7,
            top_p: 0.95,
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

/// Pull the first choice's text out of a chat-completions response body.
fn extract_content(body: &str) -> Result<String, OracleError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|err| OracleError::Malformed(err.to_string()))?;
    let content = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| OracleError::Malformed("no choices in response".to_string()))?
        .message
        .content
        .unwrap_or_default();
    Ok(content.trim().to_string())
}

fn to_json(plan: &[PlannedActivity]) -> String {
    serde_json::to_string(plan).unwrap_or_else(|_| "[]".to_string())
}

/// Blocking chat-completions client implementing [`Oracle`].
pub struct ChatOracle {
    client: Client,
    settings: ChatSettings,
    prompts: PromptTemplates,
}

impl ChatOracle {
    pub fn new(settings: ChatSettings, prompts: PromptTemplates) -> Result<Self, OracleError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| OracleError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            settings,
            prompts,
        })
    }

    /// Local Ollama server.
    pub fn ollama(model: &str) -> Result<Self, OracleError> {
        Self::new(
            ChatSettings {
                base_url: "http://localhost:11434/v1".to_string(),
                model: model.to_string(),
                ..ChatSettings::default()
            },
            PromptTemplates::default(),
        )
    }

    #[must_use]
    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.settings.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            max_tokens: self.settings.max_tokens,
            stream: false,
        }
    }

    fn render(&self, kind: PromptKind, vars: &[(&str, &str)]) -> Result<String, OracleError> {
        self.prompts
            .render(kind, vars)
            .map_err(|err| OracleError::Malformed(err.to_string()))
    }

    /// Send one prompt and return the reply text.
    pub fn complete(&self, kind: PromptKind, prompt: &str) -> Result<String, OracleError> {
        debug!(call = kind.file_stem(), chars = prompt.len(), "oracle request");
        let mut request = self
            .client
            .post(self.chat_completions_url())
            .json(&self.request_body(prompt));
        if let Some(key) = &self.settings.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request
            .send()
            .map_err(|err| OracleError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| OracleError::Transport(err.to_string()))?;
        if !status.is_success() {
            warn!(call = kind.file_stem(), %status, "oracle request failed");
            return Err(OracleError::Transport(format!("HTTP {status}: {body}")));
        }
        let content = extract_content(&body)?;
        debug!(call = kind.file_stem(), reply = %content, "oracle reply");
        Ok(content)
    }
}

impl Oracle for ChatOracle {
    fn generate_daily_plan(&mut self, request: &DailyPlanRequest<'_>) -> Result<String, OracleError> {
        let weekday = request.weekday.to_string();
        let sample = to_json(request.reference_plan);
        let activities = request.catalog.join(", ");
        let prompt = self.render(
            PromptKind::DailyPlan,
            &[
                ("user_profile", request.persona),
                ("lifestyle", request.lifestyle),
                ("weekday", weekday.as_str()),
                ("schedule_sample", sample.as_str()),
                ("activity_list", activities.as_str()),
            ],
        )?;
        self.complete(PromptKind::DailyPlan, &prompt)
    }

    fn revise_daily_plan(&mut self, request: &RevisionRequest<'_>) -> Result<String, OracleError> {
        let weekday = request.weekday.to_string();
        let remaining = to_json(request.remaining);
        let completed = to_json(request.completed);
        let activities = request.catalog.join(", ");
        let prompt = self.render(
            PromptKind::Revision,
            &[
                ("user_profile", request.persona),
                ("lifestyle", request.lifestyle),
                ("weekday", weekday.as_str()),
                ("schedule", remaining.as_str()),
                ("past_schedule", completed.as_str()),
                ("activity_list", activities.as_str()),
            ],
        )?;
        self.complete(PromptKind::Revision, &prompt)
    }

    fn decide_waiting_filler(&mut self, request: &WaitingRequest<'_>) -> Result<String, OracleError> {
        let weekday = request.weekday.to_string();
        let remaining = to_json(request.remaining);
        let completed = to_json(request.completed);
        let activities = request.catalog.join(", ");
        let minutes = request.waiting_minutes.to_string();
        let prompt = self.render(
            PromptKind::WaitingFiller,
            &[
                ("user_profile", request.persona),
                ("lifestyle", request.lifestyle),
                ("weekday", weekday.as_str()),
                ("schedule", remaining.as_str()),
                ("past_schedule", completed.as_str()),
                ("activity", request.current.activity_name.as_str()),
                ("event_name", request.waiting),
                ("event_time", minutes.as_str()),
                ("activity_list", activities.as_str()),
            ],
        )?;
        self.complete(PromptKind::WaitingFiller, &prompt)
    }

    fn decide_step_out(&mut self, request: &StepOutRequest<'_>) -> Result<String, OracleError> {
        let weekday = request.weekday.to_string();
        let remaining = to_json(request.remaining);
        let completed = to_json(request.completed);
        let activities = request.catalog.join(", ");
        let prompt = self.render(
            PromptKind::StepOut,
            &[
                ("user_profile", request.persona),
                ("lifestyle", request.lifestyle),
                ("weekday", weekday.as_str()),
                ("schedule", remaining.as_str()),
                ("past_schedule", completed.as_str()),
                ("activity_list", activities.as_str()),
            ],
        )?;
        self.complete(PromptKind::StepOut, &prompt)
    }
}
