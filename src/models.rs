use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Raw JSONL records (tagged enum via `type` field)
// ---------------------------------------------------------------------------

/// One line of a session JSONL file, as written by the coding-assistant tool.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum RawRecord {
    #[serde(rename = "user")]
    User(MessageEnvelope),
    #[serde(rename = "assistant")]
    Assistant(MessageEnvelope),
    #[serde(rename = "system")]
    System(SystemEnvelope),
    #[serde(rename = "summary")]
    Summary(SummaryEnvelope),
    #[serde(rename = "tool_use")]
    ToolUse(serde_json::Value),
    #[serde(rename = "tool_result")]
    ToolResult(serde_json::Value),
    /// The format grows record kinds over time (progress, snapshots, queue
    /// operations). Anything unrecognized parses here and is dropped later.
    #[serde(other)]
    Other,
}

// ---------------------------------------------------------------------------
// Message envelope (shared between user + assistant)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
pub struct MessageEnvelope {
    pub uuid: String,
    #[serde(rename = "parentUuid")]
    pub parent_uuid: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub timestamp: String,
    pub cwd: Option<String>,
    #[serde(rename = "gitBranch")]
    pub git_branch: Option<String>,
    #[serde(rename = "isSidechain")]
    pub is_sidechain: Option<bool>,
    pub message: MessageContent,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MessageContent {
    pub role: String,
    pub content: ContentValue,
}

/// Content is either a plain string (user text) or an array of content blocks.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ContentValue {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// Content blocks (tagged enum via `type`).
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
    },
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SystemEnvelope {
    pub uuid: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub timestamp: String,
    pub subtype: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SummaryEnvelope {
    pub summary: String,
    #[serde(rename = "leafUuid")]
    pub leaf_uuid: Option<String>,
}

// ---------------------------------------------------------------------------
// Session index (from sessions-index.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
pub struct SessionsIndex {
    pub version: Option<u32>,
    pub entries: Vec<SessionIndexEntry>,
    #[serde(rename = "originalPath")]
    pub original_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionIndexEntry {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "fullPath")]
    pub full_path: String,
    #[serde(rename = "fileMtime")]
    pub file_mtime: Option<u64>,
    #[serde(rename = "firstPrompt")]
    pub first_prompt: Option<String>,
    pub summary: Option<String>,
    #[serde(rename = "messageCount")]
    pub message_count: Option<u32>,
    pub created: Option<String>,
    pub modified: Option<String>,
    #[serde(rename = "gitBranch")]
    pub git_branch: Option<String>,
    #[serde(rename = "projectPath")]
    pub project_path: Option<String>,
    #[serde(rename = "isSidechain")]
    pub is_sidechain: Option<bool>,
}

impl SessionIndexEntry {
    /// Basename of the project path, used as the session's project name.
    pub fn project_name(&self) -> String {
        self.project_path
            .as_deref()
            .unwrap_or("unknown")
            .rsplit('/')
            .next()
            .unwrap_or("unknown")
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Canonical conversation form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One user or assistant message after normalization. Thinking blocks, tool
/// invocations, and tool results never appear here.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct NormalizedSession {
    pub id: String,
    pub turns: Vec<Turn>,
    pub project: String,
    pub start_time: String,
    pub end_time: String,
    pub summary: Option<String>,
    pub git_branch: Option<String>,
}

// ---------------------------------------------------------------------------
// Enrichment reply (the JSON the LLM judge is instructed to produce)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichmentResult {
    #[serde(rename = "isSignificant")]
    pub is_significant: bool,
    pub entry: Option<WorklogEntry>,
    pub context: ContextDoc,
}

/// The short structured payload surfaced in downstream UIs. Present iff the
/// judge marked the session significant.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorklogEntry {
    pub summary: String,
    pub decision: String,
    pub problem: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextDoc {
    pub title: String,
    #[serde(rename = "promptsAndIntent")]
    pub prompts_and_intent: String,
    #[serde(rename = "keyDecisions", default)]
    pub key_decisions: Vec<KeyDecision>,
    #[serde(rename = "problemsSolved", default)]
    pub problems_solved: Vec<String>,
    #[serde(default)]
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyDecision {
    pub title: String,
    pub reasoning: String,
}

// ---------------------------------------------------------------------------
// Publication
// ---------------------------------------------------------------------------

/// Body of a content-store upsert. `path` alone determines identity in the
/// store; posting the same path twice overwrites.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishPayload {
    pub path: String,
    pub content: String,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Per-session outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub session_id: String,
    pub project: String,
    pub published: bool,
    pub is_significant: bool,
    pub summary: Option<String>,
    pub skipped_reason: Option<String>,
}

impl ProcessResult {
    /// A result for a session that never reached publication.
    pub fn skipped(entry: &SessionIndexEntry, reason: impl Into<String>) -> Self {
        Self {
            session_id: entry.session_id.clone(),
            project: entry.project_name(),
            published: false,
            is_significant: false,
            summary: None,
            skipped_reason: Some(reason.into()),
        }
    }
}
