use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::models::{EnrichmentResult, NormalizedSession, PublishPayload};

/// Deadline for one content-store request.
const PUBLISH_TIMEOUT_SECS: u64 = 30;

/// Per-session publish failures. Recoverable; the orchestrator records them
/// and the next batch re-selects the session. No retry happens here.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("request to content store failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("content store returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid session start time {value:?}: {source}")]
    BadStartTime {
        value: String,
        source: chrono::ParseError,
    },
}

/// Derive the UTC `YYYY-MM-DD` document date from a session's start time.
pub fn publish_date(start_time: &str) -> Result<String, PublishError> {
    let parsed = DateTime::parse_from_rfc3339(start_time).map_err(|source| {
        PublishError::BadStartTime {
            value: start_time.to_string(),
            source,
        }
    })?;
    Ok(parsed.with_timezone(&Utc).format("%Y-%m-%d").to_string())
}

/// Build the upsert body for one session. The `path` is a deterministic
/// function of the session's UTC start date and id, which is what makes
/// re-publication idempotent.
pub fn build_payload(
    session: &NormalizedSession,
    enrichment: &EnrichmentResult,
    markdown: String,
) -> Result<PublishPayload, PublishError> {
    let date = publish_date(&session.start_time)?;
    let path = format!("/worklog/{date}/{}", session.id);

    let mut tags = vec!["worklog".to_string(), session.project.clone()];
    if enrichment.is_significant {
        if let Some(entry) = &enrichment.entry {
            tags.extend(entry.tags.iter().cloned());
        }
    }

    let entry = enrichment.entry.as_ref();
    let mut metadata = BTreeMap::new();
    metadata.insert("source".to_string(), "claude-code".to_string());
    metadata.insert("sessionId".to_string(), session.id.clone());
    metadata.insert("project".to_string(), session.project.clone());
    metadata.insert("date".to_string(), date);
    metadata.insert(
        "public".to_string(),
        enrichment.is_significant.to_string(),
    );
    metadata.insert(
        "summary".to_string(),
        entry.map(|e| e.summary.clone()).unwrap_or_default(),
    );
    metadata.insert(
        "decision".to_string(),
        entry.map(|e| e.decision.clone()).unwrap_or_default(),
    );
    metadata.insert(
        "problem".to_string(),
        entry.map(|e| e.problem.clone()).unwrap_or_default(),
    );
    metadata.insert(
        "entryTags".to_string(),
        entry.map(|e| e.tags.join(",")).unwrap_or_default(),
    );
    metadata.insert("links".to_string(), String::new());

    Ok(PublishPayload {
        path,
        content: markdown,
        tags,
        metadata,
    })
}

/// Upserts documents into the remote content store over HTTP.
pub struct Publisher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl Publisher {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PUBLISH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// POST the payload to the documents endpoint. The store upserts by
    /// `path`, so re-posting the same document is harmless.
    pub async fn publish(&self, payload: &PublishPayload) -> Result<(), PublishError> {
        let response = self
            .client
            .post(format!("{}/api/documents", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(path = %payload.path, "document published");
        Ok(())
    }
}
