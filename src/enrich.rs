use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{EnrichmentResult, NormalizedSession};

/// Sessions shorter than this after sanitization are not worth an LLM call.
pub const MIN_TURNS: usize = 3;

/// Judge temperature. Low enough to keep the reply schema stable.
const TEMPERATURE: f32 = 0.3;

/// Deadline for one enrichment call.
const ENRICH_TIMEOUT_SECS: u64 = 120;

const SYSTEM_PROMPT: &str = r#"You are a careful engineering-work judge. You read one coding-assistant session and decide whether it contains a durable engineering decision, problem, or insight worth publishing as a worklog entry.

Reply with exactly this JSON object and nothing else:

{
  "isSignificant": bool,
  "entry": null | { "summary": str, "decision": str, "problem": str, "tags": [str] },
  "context": {
    "title": str,
    "promptsAndIntent": str,
    "keyDecisions": [ { "title": str, "reasoning": str } ],
    "problemsSolved": [str],
    "insights": [str]
  }
}

Rules:
- "entry" must be a full object when isSignificant is true, and null when it is false.
- "title" is a short, specific name for the session.
- Do not wrap the JSON in markdown fences or add commentary."#;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Transport-level failures talking to the LLM gateway.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to LLM gateway failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("LLM gateway returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LLM gateway reply carried no content")]
    EmptyReply,
}

/// Per-session enrichment failures. All variants are recoverable: the
/// orchestrator records them and moves on.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("too few turns ({0})")]
    TooFewTurns(usize),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("unusable enrichment reply: {message}; reply was: {reply:?}")]
    BadReply { message: String, reply: String },
}

// ---------------------------------------------------------------------------
// LLM client seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub model: String,
}

/// A "generate text given (system, user, temperature, model)" service.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Production client for the `ai-gateway` provider, speaking the
/// OpenAI-compatible chat-completions shape most gateways expose.
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ENRICH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for GatewayClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": request.model,
            "temperature": request.temperature,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyReply)
    }

    fn name(&self) -> &str {
        "ai-gateway"
    }
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

/// Classifies a sanitized session and produces its worklog entry + context
/// document via the configured LLM.
pub struct Enricher {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl Enricher {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub async fn enrich(&self, session: &NormalizedSession) -> Result<EnrichmentResult, EnrichError> {
        if session.turns.len() < MIN_TURNS {
            return Err(EnrichError::TooFewTurns(session.turns.len()));
        }

        let request = GenerateRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: build_user_prompt(session),
            temperature: TEMPERATURE,
            model: self.model.clone(),
        };

        tracing::debug!(
            session_id = %session.id,
            provider = self.client.name(),
            model = %self.model,
            "requesting enrichment"
        );

        let reply = self.client.generate(request).await?;
        parse_reply(&reply)
    }
}

/// Render the judge's user prompt: session metadata plus the conversation as
/// alternating `USER:` / `ASSISTANT:` sections.
pub fn build_user_prompt(session: &NormalizedSession) -> String {
    let mut prompt = String::with_capacity(4096);
    prompt.push_str(&format!("Project: {}\n", session.project));
    if let Some(branch) = &session.git_branch {
        prompt.push_str(&format!("Branch: {branch}\n"));
    }
    if let Some(summary) = &session.summary {
        prompt.push_str(&format!("Session summary: {summary}\n"));
    }
    prompt.push_str("\nConversation:\n");
    for turn in &session.turns {
        prompt.push_str(&format!(
            "{}:\n{}\n\n",
            turn.role.as_str().to_uppercase(),
            turn.content
        ));
    }
    prompt
}

/// Parse the judge's reply. Empty text, non-JSON, a missing `isSignificant`,
/// or a significant session without an entry all fail with the raw reply
/// attached for diagnostics.
pub fn parse_reply(reply: &str) -> Result<EnrichmentResult, EnrichError> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(EnrichError::BadReply {
            message: "empty reply".into(),
            reply: reply.to_string(),
        });
    }

    let json = extract_json(trimmed);
    let result: EnrichmentResult =
        serde_json::from_str(json).map_err(|e| EnrichError::BadReply {
            message: e.to_string(),
            reply: reply.to_string(),
        })?;

    if result.is_significant && result.entry.is_none() {
        return Err(EnrichError::BadReply {
            message: "isSignificant is true but entry is null".into(),
            reply: reply.to_string(),
        });
    }

    Ok(result)
}

/// Extract a JSON object from text that may contain markdown fences.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    // Strip markdown code fences
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    // Find the first { and last }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            return &trimmed[start..=end];
        }
    }
    trimmed
}
