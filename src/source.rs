use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::models::{RawRecord, SessionIndexEntry, SessionsIndex};

/// Minimum message count for a session to be worth processing.
pub const MIN_MESSAGE_COUNT: u32 = 5;

/// Read-only adapter over the coding-assistant tool's on-disk session store.
///
/// Layout: `<base>/<encoded-project>/sessions-index.json` plus one
/// `<sessionId>.jsonl` per session. The store is written by a third party;
/// this adapter never modifies it.
pub struct SessionStore {
    base_dir: PathBuf,
}

/// Derive the on-disk directory name for a project path by replacing every
/// `/` and `.` with `-`. Lossy but stable; the index's `originalPath` is the
/// source of truth in the other direction.
pub fn encode_project_dir(project_path: &str) -> String {
    project_path
        .chars()
        .map(|c| if c == '/' || c == '.' { '-' } else { c })
        .collect()
}

/// Index entries that represent genuine top-level engineering sessions.
/// Sidechains, short sessions, and subagent transcripts are rejected.
pub fn is_eligible(entry: &SessionIndexEntry) -> bool {
    if entry.is_sidechain.unwrap_or(false) {
        return false;
    }
    if entry.message_count.unwrap_or(0) < MIN_MESSAGE_COUNT {
        return false;
    }
    if entry.session_id.starts_with("agent-") {
        return false;
    }
    true
}

impl SessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn index_path(&self, project_path: &str) -> PathBuf {
        self.base_dir
            .join(encode_project_dir(project_path))
            .join("sessions-index.json")
    }

    /// Enumerate known projects by their original paths.
    ///
    /// Scans immediate subdirectories of the base; a directory counts only if
    /// it holds a readable, JSON-valid `sessions-index.json` carrying an
    /// `originalPath`. Everything else is skipped silently.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let read_dir = std::fs::read_dir(&self.base_dir)
            .with_context(|| format!("failed to read {}", self.base_dir.display()))?;

        let mut projects = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = match dir_entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!("unreadable entry under {}: {e}", self.base_dir.display());
                    continue;
                }
            };
            let path = dir_entry.path();
            if !path.is_dir() {
                continue;
            }

            let index_path = path.join("sessions-index.json");
            let data = match std::fs::read_to_string(&index_path) {
                Ok(d) => d,
                Err(_) => continue,
            };
            let index: SessionsIndex = match serde_json::from_str(&data) {
                Ok(i) => i,
                Err(_) => continue,
            };
            if let Some(original_path) = index.original_path {
                projects.push(original_path);
            }
        }

        projects.sort();
        Ok(projects)
    }

    /// Read a project's sessions index. Returns `None` when the index file is
    /// absent; any other failure (unreadable file, malformed JSON) propagates.
    pub fn read_sessions_index(&self, project_path: &str) -> Result<Option<SessionsIndex>> {
        let path = self.index_path(project_path);
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        let index: SessionsIndex = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(index))
    }

    /// The most recently modified eligible session of a project, or `None`.
    pub fn latest_session(&self, project_path: &str) -> Result<Option<SessionIndexEntry>> {
        let index = match self.read_sessions_index(project_path)? {
            Some(i) => i,
            None => return Ok(None),
        };

        let latest = index
            .entries
            .into_iter()
            .filter(is_eligible)
            .max_by(|a, b| a.modified.cmp(&b.modified));
        Ok(latest)
    }

    /// Resolve a session by exact id, or by unique strict id prefix. An
    /// ambiguous prefix (two or more matches) resolves to `None`.
    pub fn session_by_id(&self, project_path: &str, id: &str) -> Result<Option<SessionIndexEntry>> {
        let index = match self.read_sessions_index(project_path)? {
            Some(i) => i,
            None => return Ok(None),
        };

        if let Some(entry) = index.entries.iter().find(|e| e.session_id == id) {
            return Ok(Some(entry.clone()));
        }

        let mut matches = index
            .entries
            .iter()
            .filter(|e| e.session_id.len() > id.len() && e.session_id.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Ok(Some(entry.clone())),
            _ => Ok(None),
        }
    }

    /// Read and parse every record of a session's JSONL file. Blank lines are
    /// skipped; a malformed line fails the whole file.
    pub fn read_session_records(&self, entry: &SessionIndexEntry) -> Result<Vec<RawRecord>> {
        let data = std::fs::read_to_string(&entry.full_path)
            .with_context(|| format!("failed to read {}", entry.full_path))?;

        let mut records = Vec::new();
        for (line_no, line) in data.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: RawRecord = serde_json::from_str(trimmed).with_context(|| {
                format!("failed to parse {}:{}", entry.full_path, line_no + 1)
            })?;
            records.push(record);
        }
        Ok(records)
    }
}
