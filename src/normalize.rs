use crate::models::{
    ContentBlock, ContentValue, MessageEnvelope, NormalizedSession, RawRecord, Role,
    SessionIndexEntry, Turn,
};

/// Reshape a session's raw records into the canonical conversation form.
///
/// Records are processed in file order; the source writes append-only, so the
/// order is never re-derived from timestamps. Sidechain records, empty
/// messages, and everything that is not a user or assistant message are
/// dropped.
pub fn normalize(entry: &SessionIndexEntry, records: &[RawRecord]) -> NormalizedSession {
    let mut turns = Vec::new();

    for record in records {
        match record {
            RawRecord::User(envelope) => {
                if let Some(turn) = user_turn(envelope) {
                    turns.push(turn);
                }
            }
            RawRecord::Assistant(envelope) => {
                if let Some(turn) = assistant_turn(envelope) {
                    turns.push(turn);
                }
            }
            RawRecord::System(_)
            | RawRecord::Summary(_)
            | RawRecord::ToolUse(_)
            | RawRecord::ToolResult(_)
            | RawRecord::Other => {}
        }
    }

    let start_time = turns
        .first()
        .map(|t| t.timestamp.clone())
        .or_else(|| entry.created.clone())
        .unwrap_or_default();
    let end_time = turns
        .last()
        .map(|t| t.timestamp.clone())
        .or_else(|| entry.modified.clone())
        .unwrap_or_else(|| start_time.clone());

    NormalizedSession {
        id: entry.session_id.clone(),
        turns,
        project: entry.project_name(),
        start_time,
        end_time,
        summary: entry.summary.clone(),
        git_branch: entry.git_branch.clone(),
    }
}

/// User turns come from string payloads only. Block-form user content carries
/// tool results, which must not reach the canonical form.
fn user_turn(envelope: &MessageEnvelope) -> Option<Turn> {
    if envelope.is_sidechain.unwrap_or(false) {
        return None;
    }
    match &envelope.message.content {
        ContentValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            Some(Turn {
                role: Role::User,
                content: trimmed.to_string(),
                timestamp: envelope.timestamp.clone(),
            })
        }
        ContentValue::Blocks(_) => None,
    }
}

/// Assistant turns keep `text` blocks only, joined by a single blank line.
fn assistant_turn(envelope: &MessageEnvelope) -> Option<Turn> {
    if envelope.is_sidechain.unwrap_or(false) {
        return None;
    }
    let content = match &envelope.message.content {
        ContentValue::Text(text) => text.trim().to_string(),
        ContentValue::Blocks(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Thinking { .. }
                    | ContentBlock::ToolUse { .. }
                    | ContentBlock::ToolResult { .. } => None,
                })
                .collect();
            texts.join("\n\n").trim().to_string()
        }
    };

    if content.is_empty() {
        return None;
    }
    Some(Turn {
        role: Role::Assistant,
        content,
        timestamp: envelope.timestamp.clone(),
    })
}
