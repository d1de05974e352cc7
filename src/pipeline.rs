use crate::config::SanitizationConfig;
use crate::enrich::{Enricher, MIN_TURNS};
use crate::format::render_document;
use crate::models::{EnrichmentResult, NormalizedSession, ProcessResult, SessionIndexEntry};
use crate::normalize::normalize;
use crate::publish::{self, Publisher};
use crate::sanitize::sanitize_session;
use crate::source::SessionStore;

/// One pipeline instance: the per-session stage sequence A→F plus the
/// collaborators each stage needs. Sessions processed concurrently share
/// nothing mutable.
pub struct Pipeline {
    pub store: SessionStore,
    pub sanitization: SanitizationConfig,
    pub enricher: Enricher,
    pub publisher: Publisher,
}

impl Pipeline {
    /// Run the read→normalize→sanitize→enrich→format prefix of the pipeline.
    /// `Err` carries the skip reason for the process result.
    pub async fn evaluate_session(
        &self,
        entry: &SessionIndexEntry,
    ) -> Result<(NormalizedSession, EnrichmentResult, String), String> {
        let records = self
            .store
            .read_session_records(entry)
            .map_err(|e| format!("read failed: {e:#}"))?;

        let session = normalize(entry, &records);
        if session.turns.len() < MIN_TURNS {
            return Err("too few turns".to_string());
        }

        let session = sanitize_session(&self.sanitization, session)
            .ok_or_else(|| "sanitized away".to_string())?;
        if session.turns.len() < MIN_TURNS {
            return Err("too few turns".to_string());
        }

        let enrichment = self
            .enricher
            .enrich(&session)
            .await
            .map_err(|e| format!("Enrichment failed: {e}"))?;

        let markdown = render_document(&enrichment.context, &session);
        Ok((session, enrichment, markdown))
    }

    /// Process one index entry end-to-end. Every failure becomes a
    /// `ProcessResult` with a reason; nothing escapes.
    pub async fn process_session(&self, entry: &SessionIndexEntry) -> ProcessResult {
        let (session, enrichment, markdown) = match self.evaluate_session(entry).await {
            Ok(prepared) => prepared,
            Err(reason) => {
                tracing::info!(
                    session_id = %entry.session_id,
                    project = %entry.project_name(),
                    reason = %reason,
                    "session skipped"
                );
                return ProcessResult::skipped(entry, reason);
            }
        };

        let payload = match publish::build_payload(&session, &enrichment, markdown) {
            Ok(payload) => payload,
            Err(e) => {
                return ProcessResult {
                    session_id: session.id,
                    project: session.project,
                    published: false,
                    is_significant: enrichment.is_significant,
                    summary: None,
                    skipped_reason: Some(format!("Publish failed: {e}")),
                };
            }
        };

        if let Err(e) = self.publisher.publish(&payload).await {
            tracing::warn!(
                session_id = %session.id,
                path = %payload.path,
                "publish failed: {e}"
            );
            return ProcessResult {
                session_id: session.id,
                project: session.project,
                published: false,
                is_significant: enrichment.is_significant,
                summary: None,
                skipped_reason: Some(format!("Publish failed: {e}")),
            };
        }

        let summary = enrichment
            .entry
            .as_ref()
            .map(|entry| entry.summary.clone())
            .unwrap_or_else(|| enrichment.context.title.clone());

        tracing::info!(
            session_id = %session.id,
            project = %session.project,
            path = %payload.path,
            significant = enrichment.is_significant,
            "session published"
        );

        ProcessResult {
            session_id: session.id,
            project: session.project,
            published: true,
            is_significant: enrichment.is_significant,
            summary: Some(summary),
            skipped_reason: None,
        }
    }
}
