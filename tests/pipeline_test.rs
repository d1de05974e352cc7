//! End-to-end pipeline tests: a temp session store on disk, a scripted LLM
//! client, and a mock content store. All conversation content uses public
//! domain text (Shakespeare, Whitman, Dickinson).

use async_trait::async_trait;
use mockito::Matcher;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use worklog::batch::{run_batch, BatchOptions};
use worklog::config::SanitizationConfig;
use worklog::enrich::{Enricher, GenerateRequest, LlmClient, LlmError};
use worklog::models::SessionIndexEntry;
use worklog::pipeline::Pipeline;
use worklog::publish::Publisher;
use worklog::source::{encode_project_dir, SessionStore};
use worklog::state::HighWaterMarks;

const HAMLET: &str = "To be, or not to be, that is the question.";
const WHITMAN: &str = "I believe a leaf of grass is no less than the journey-work of the stars.";
const DICKINSON: &str = "Hope is the thing with feathers that perches in the soul.";

const SIGNIFICANT_REPLY: &str = r#"{
    "isSignificant": true,
    "entry": {
        "summary": "Implemented two-tier ISR caching for worklog page",
        "decision": "Cache at the edge and revalidate hourly",
        "problem": "Page rebuilds were slow",
        "tags": ["performance", "frontend"]
    },
    "context": {
        "title": "Worklog Caching Implementation",
        "promptsAndIntent": "Speed up the worklog page.",
        "keyDecisions": [{"title": "Two-tier cache", "reasoning": "Balances freshness and cost."}],
        "problemsSolved": ["Slow rebuilds"],
        "insights": ["ISR fits append-mostly content"]
    }
}"#;

const NON_SIGNIFICANT_REPLY: &str = r#"{
    "isSignificant": false,
    "entry": null,
    "context": {
        "title": "Routine Dependency Bumps",
        "promptsAndIntent": "Update dependencies.",
        "keyDecisions": [],
        "problemsSolved": [],
        "insights": []
    }
}"#;

// ---------------------------------------------------------------------------
// Scripted LLM client
// ---------------------------------------------------------------------------

struct MockLlm {
    reply: String,
    calls: AtomicUsize,
}

impl MockLlm {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(&self, _request: GenerateRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Fixture builders — matching the real session store layout
// ---------------------------------------------------------------------------

fn user_msg(uuid: &str, session_id: &str, timestamp: &str, text: &str) -> String {
    format!(
        r#"{{"parentUuid":null,"isSidechain":false,"userType":"external","cwd":"/home/u/portfolio","sessionId":"{session_id}","gitBranch":"worklog-caching","type":"user","message":{{"role":"user","content":"{text}"}},"uuid":"{uuid}","timestamp":"{timestamp}"}}"#
    )
}

fn assistant_msg(uuid: &str, session_id: &str, timestamp: &str, text: &str) -> String {
    format!(
        r#"{{"parentUuid":"u0","isSidechain":false,"cwd":"/home/u/portfolio","sessionId":"{session_id}","gitBranch":"worklog-caching","type":"assistant","message":{{"model":"model-x","id":"msg_01","role":"assistant","content":"{text}"}},"uuid":"{uuid}","timestamp":"{timestamp}"}}"#
    )
}

fn assistant_blocks_msg(
    uuid: &str,
    session_id: &str,
    timestamp: &str,
    thinking: &str,
    text: &str,
) -> String {
    format!(
        r#"{{"parentUuid":"u0","isSidechain":false,"cwd":"/home/u/portfolio","sessionId":"{session_id}","gitBranch":"worklog-caching","type":"assistant","message":{{"model":"model-x","id":"msg_02","role":"assistant","content":[{{"type":"thinking","thinking":"{thinking}"}},{{"type":"text","text":"{text}"}}]}},"uuid":"{uuid}","timestamp":"{timestamp}"}}"#
    )
}

fn progress_msg(session_id: &str) -> String {
    format!(
        r#"{{"type":"progress","uuid":"p1","sessionId":"{session_id}","timestamp":"2025-01-22T10:04:00Z","data":{{}}}}"#
    )
}

fn summary_msg() -> String {
    r#"{"type":"summary","summary":"Worked on worklog caching","leafUuid":"a3"}"#.to_string()
}

/// Six conversational turns (3 user, 3 assistant, one with a thinking block)
/// plus records the normalizer must drop.
fn happy_session_lines(session_id: &str) -> Vec<String> {
    vec![
        user_msg("u1", session_id, "2025-01-22T10:00:00Z", "Make the worklog page faster"),
        assistant_blocks_msg(
            "a1",
            session_id,
            "2025-01-22T10:01:00Z",
            DICKINSON,
            "I will add a two-tier cache.",
        ),
        progress_msg(session_id),
        user_msg("u2", session_id, "2025-01-22T10:10:00Z", HAMLET),
        assistant_msg("a2", session_id, "2025-01-22T10:11:00Z", WHITMAN),
        user_msg("u3", session_id, "2025-01-22T10:20:00Z", "Ship it"),
        assistant_msg("a3", session_id, "2025-01-22T10:21:00Z", "Done, revalidation is hourly."),
        summary_msg(),
    ]
}

struct StoreFixture {
    _tmp: TempDir,
    base: std::path::PathBuf,
}

impl StoreFixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().to_path_buf();
        Self { _tmp: tmp, base }
    }

    /// Write one session (JSONL + index entry) into a project directory.
    /// Returns the index entry as the adapter would read it.
    fn add_session(
        &self,
        project_path: &str,
        session_id: &str,
        message_count: u32,
        modified: &str,
        lines: &[String],
    ) -> SessionIndexEntry {
        let dir = self.base.join(encode_project_dir(project_path));
        fs::create_dir_all(&dir).unwrap();

        let jsonl_path = dir.join(format!("{session_id}.jsonl"));
        fs::write(&jsonl_path, format!("{}\n", lines.join("\n"))).unwrap();

        let entry = SessionIndexEntry {
            session_id: session_id.to_string(),
            full_path: jsonl_path.to_string_lossy().into_owned(),
            file_mtime: Some(1_769_364_547_212),
            first_prompt: Some("Make the worklog page faster".into()),
            summary: Some("Worklog caching work".into()),
            message_count: Some(message_count),
            created: Some("2025-01-22T10:00:00Z".into()),
            modified: Some(modified.to_string()),
            git_branch: Some("worklog-caching".into()),
            project_path: Some(project_path.to_string()),
            is_sidechain: Some(false),
        };
        self.write_index(project_path, &[entry.clone()]);
        entry
    }

    fn write_index(&self, project_path: &str, entries: &[SessionIndexEntry]) {
        let dir = self.base.join(encode_project_dir(project_path));
        fs::create_dir_all(&dir).unwrap();
        let index = json!({
            "version": 1,
            "entries": entries,
            "originalPath": project_path,
        });
        fs::write(
            dir.join("sessions-index.json"),
            serde_json::to_string_pretty(&index).unwrap(),
        )
        .unwrap();
    }
}

fn make_pipeline(
    base: &Path,
    server_url: &str,
    reply: &str,
    sanitization: SanitizationConfig,
) -> (Pipeline, Arc<MockLlm>) {
    let llm = MockLlm::new(reply);
    let pipeline = Pipeline {
        store: SessionStore::new(base),
        sanitization,
        enricher: Enricher::new(llm.clone(), "judge-1"),
        publisher: Publisher::new(server_url, "test-key").unwrap(),
    };
    (pipeline, llm)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_happy_path_publishes_significant_session() {
    let fixture = StoreFixture::new();
    let entry = fixture.add_session(
        "/home/u/portfolio",
        "test-session-abc",
        10,
        "2025-01-22T11:00:00Z",
        &happy_session_lines("test-session-abc"),
    );

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({
                "path": "/worklog/2025-01-22/test-session-abc",
                "tags": ["worklog", "portfolio", "performance", "frontend"],
                "metadata": {
                    "source": "claude-code",
                    "sessionId": "test-session-abc",
                    "project": "portfolio",
                    "date": "2025-01-22",
                    "public": "true",
                    "summary": "Implemented two-tier ISR caching for worklog page",
                    "entryTags": "performance,frontend",
                },
            })),
            Matcher::Regex("# Session: Worklog Caching Implementation".to_string()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let (pipeline, llm) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        SIGNIFICANT_REPLY,
        SanitizationConfig::default(),
    );

    let result = pipeline.process_session(&entry).await;
    assert!(result.published, "unexpected skip: {:?}", result.skipped_reason);
    assert!(result.is_significant);
    assert_eq!(
        result.summary.as_deref(),
        Some("Implemented two-tier ISR caching for worklog page")
    );
    assert_eq!(llm.calls.load(Ordering::Relaxed), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_non_significant_session_still_publishes() {
    let fixture = StoreFixture::new();
    let entry = fixture.add_session(
        "/home/u/portfolio",
        "test-session-abc",
        10,
        "2025-01-22T11:00:00Z",
        &happy_session_lines("test-session-abc"),
    );

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents")
        .match_body(Matcher::PartialJson(json!({
            "path": "/worklog/2025-01-22/test-session-abc",
            "tags": ["worklog", "portfolio"],
            "metadata": {
                "public": "false",
                "summary": "",
                "entryTags": "",
            },
        })))
        .with_status(200)
        .create_async()
        .await;

    let (pipeline, _) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        NON_SIGNIFICANT_REPLY,
        SanitizationConfig::default(),
    );

    let result = pipeline.process_session(&entry).await;
    assert!(result.published);
    assert!(!result.is_significant);
    // Falls back to the context title when there is no entry
    assert_eq!(result.summary.as_deref(), Some("Routine Dependency Bumps"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_enrichment_failure_skips_publication() {
    let fixture = StoreFixture::new();
    let entry = fixture.add_session(
        "/home/u/portfolio",
        "test-session-abc",
        10,
        "2025-01-22T11:00:00Z",
        &happy_session_lines("test-session-abc"),
    );

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents")
        .expect(0)
        .create_async()
        .await;

    let (pipeline, llm) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        "not valid json",
        SanitizationConfig::default(),
    );

    let result = pipeline.process_session(&entry).await;
    assert!(!result.published);
    assert!(result
        .skipped_reason
        .as_deref()
        .unwrap()
        .starts_with("Enrichment failed:"));
    assert_eq!(llm.calls.load(Ordering::Relaxed), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_publish_failure_is_recorded() {
    let fixture = StoreFixture::new();
    let entry = fixture.add_session(
        "/home/u/portfolio",
        "test-session-abc",
        10,
        "2025-01-22T11:00:00Z",
        &happy_session_lines("test-session-abc"),
    );

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/documents")
        .with_status(503)
        .with_body("store unavailable")
        .create_async()
        .await;

    let (pipeline, _) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        SIGNIFICANT_REPLY,
        SanitizationConfig::default(),
    );

    let result = pipeline.process_session(&entry).await;
    assert!(!result.published);
    assert!(result.is_significant);
    assert!(result
        .skipped_reason
        .as_deref()
        .unwrap()
        .starts_with("Publish failed:"));
}

#[tokio::test]
async fn test_too_few_turns_skips_before_llm() {
    let fixture = StoreFixture::new();
    // Eligible by message count, but only two conversational turns survive
    let lines = vec![
        user_msg("u1", "short", "2025-01-22T10:00:00Z", "quick question"),
        assistant_msg("a1", "short", "2025-01-22T10:01:00Z", "quick answer"),
        progress_msg("short"),
        summary_msg(),
    ];
    let entry = fixture.add_session("/home/u/portfolio", "short", 6, "2025-01-22T11:00:00Z", &lines);

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents")
        .expect(0)
        .create_async()
        .await;

    let (pipeline, llm) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        SIGNIFICANT_REPLY,
        SanitizationConfig::default(),
    );

    let result = pipeline.process_session(&entry).await;
    assert_eq!(result.skipped_reason.as_deref(), Some("too few turns"));
    assert_eq!(llm.calls.load(Ordering::Relaxed), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_blocklisted_content_sanitized_away() {
    let fixture = StoreFixture::new();
    let entry = fixture.add_session(
        "/home/u/portfolio",
        "test-session-abc",
        10,
        "2025-01-22T11:00:00Z",
        &happy_session_lines("test-session-abc"),
    );

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents")
        .expect(0)
        .create_async()
        .await;

    // Every fixture turn mentions neither of these; block the project instead
    let sanitization = SanitizationConfig {
        blocked_projects: vec!["portfolio".into()],
        ..Default::default()
    };
    let (pipeline, llm) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        SIGNIFICANT_REPLY,
        sanitization,
    );

    let result = pipeline.process_session(&entry).await;
    assert_eq!(result.skipped_reason.as_deref(), Some("sanitized away"));
    assert_eq!(llm.calls.load(Ordering::Relaxed), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_post_sanitize_turn_count_recheck() {
    let fixture = StoreFixture::new();
    // Three turns, one of which mentions a blocked domain and gets filtered,
    // leaving two, below the enrichment threshold.
    let lines = vec![
        user_msg("u1", "filtered", "2025-01-22T10:00:00Z", "Deploy to internal.example.com now"),
        assistant_msg("a1", "filtered", "2025-01-22T10:01:00Z", "Deploying."),
        user_msg("u2", "filtered", "2025-01-22T10:02:00Z", "Thanks"),
    ];
    let entry = fixture.add_session("/home/u/portfolio", "filtered", 6, "2025-01-22T11:00:00Z", &lines);

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents")
        .expect(0)
        .create_async()
        .await;

    let sanitization = SanitizationConfig {
        blocked_domains: vec!["internal.example.com".into()],
        ..Default::default()
    };
    let (pipeline, llm) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        SIGNIFICANT_REPLY,
        sanitization,
    );

    let result = pipeline.process_session(&entry).await;
    assert_eq!(result.skipped_reason.as_deref(), Some("too few turns"));
    assert_eq!(llm.calls.load(Ordering::Relaxed), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_reprocessing_is_idempotent() {
    let fixture = StoreFixture::new();
    let entry = fixture.add_session(
        "/home/u/portfolio",
        "test-session-abc",
        10,
        "2025-01-22T11:00:00Z",
        &happy_session_lines("test-session-abc"),
    );

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents")
        .match_body(Matcher::PartialJson(json!({
            "path": "/worklog/2025-01-22/test-session-abc",
        })))
        .with_status(200)
        .expect(2)
        .create_async()
        .await;

    let (pipeline, _) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        SIGNIFICANT_REPLY,
        SanitizationConfig::default(),
    );

    let first = pipeline.process_session(&entry).await;
    let second = pipeline.process_session(&entry).await;
    assert!(first.published && second.published);
    // Both posts targeted the same deterministic path
    mock.assert_async().await;
}

// ---------------------------------------------------------------------------
// Batch behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_batch_skips_agent_sessions_and_advances_marks() {
    let fixture = StoreFixture::new();

    // Build one project index holding an eligible session and a newer
    // subagent transcript that must never be read from disk.
    let real = fixture.add_session(
        "/home/u/portfolio",
        "real",
        6,
        "2025-01-22T11:00:00Z",
        &happy_session_lines("real"),
    );
    let agent = SessionIndexEntry {
        session_id: "agent-sub-1".into(),
        full_path: "/nonexistent/agent-sub-1.jsonl".into(),
        file_mtime: None,
        first_prompt: None,
        summary: None,
        message_count: Some(20),
        created: Some("2025-01-22T11:30:00Z".into()),
        modified: Some("2025-01-22T12:00:00Z".into()),
        git_branch: None,
        project_path: Some("/home/u/portfolio".into()),
        is_sidechain: Some(false),
    };
    fixture.write_index("/home/u/portfolio", &[real.clone(), agent]);

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (pipeline, _) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        SIGNIFICANT_REPLY,
        SanitizationConfig::default(),
    );

    let outcome = run_batch(&pipeline, &HighWaterMarks::default(), &BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].session_id, "real");
    assert!(outcome.results[0].published);
    assert!(!outcome.cancelled);
    // The mark reflects the eligible selection only
    assert_eq!(
        outcome.high_water.get("/home/u/portfolio").map(String::as_str),
        Some("2025-01-22T11:00:00Z")
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_batch_ignores_sessions_at_or_below_mark() {
    let fixture = StoreFixture::new();
    fixture.add_session(
        "/home/u/portfolio",
        "already-done",
        10,
        "2025-01-22T11:00:00Z",
        &happy_session_lines("already-done"),
    );

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents")
        .expect(0)
        .create_async()
        .await;

    let (pipeline, _) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        SIGNIFICANT_REPLY,
        SanitizationConfig::default(),
    );

    let mut marks = HighWaterMarks::default();
    marks.advance("/home/u/portfolio", "2025-01-22T11:00:00Z");

    let outcome = run_batch(&pipeline, &marks, &BatchOptions::default())
        .await
        .unwrap();
    assert!(outcome.results.is_empty());
    assert!(outcome.high_water.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_batch_isolates_per_session_failures() {
    let fixture = StoreFixture::new();

    // One readable session and one whose JSONL has a corrupt line.
    let good = fixture.add_session(
        "/home/u/portfolio",
        "good",
        6,
        "2025-01-22T11:00:00Z",
        &happy_session_lines("good"),
    );
    let mut bad_lines = happy_session_lines("bad");
    bad_lines.push("{torn write".to_string());
    let bad = fixture.add_session(
        "/home/u/alpha",
        "bad",
        6,
        "2025-01-22T12:00:00Z",
        &bad_lines,
    );
    fixture.write_index("/home/u/portfolio", &[good]);
    fixture.write_index("/home/u/alpha", &[bad]);

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (pipeline, _) = make_pipeline(
        fixture.base.as_path(),
        &server.url(),
        SIGNIFICANT_REPLY,
        SanitizationConfig::default(),
    );

    let outcome = run_batch(&pipeline, &HighWaterMarks::default(), &BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    let bad_result = outcome
        .results
        .iter()
        .find(|r| r.session_id == "bad")
        .unwrap();
    assert!(!bad_result.published);
    assert!(bad_result
        .skipped_reason
        .as_deref()
        .unwrap()
        .starts_with("read failed:"));

    let good_result = outcome
        .results
        .iter()
        .find(|r| r.session_id == "good")
        .unwrap();
    assert!(good_result.published);

    // Failed sessions still move their project's observed mark
    assert_eq!(
        outcome.high_water.get("/home/u/alpha").map(String::as_str),
        Some("2025-01-22T12:00:00Z")
    );
    mock.assert_async().await;
}
