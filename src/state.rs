use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Per-project high-water marks: the `modified` timestamp above which a
/// project's sessions count as processed. Owned by the host; the batch runner
/// only consumes and emits the map.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct HighWaterMarks {
    #[serde(default)]
    pub version: u32,
    /// projectPath → ISO-8601 `modified` timestamp.
    #[serde(default)]
    pub marks: BTreeMap<String, String>,
}

impl HighWaterMarks {
    /// Load marks from disk. A missing file is an empty mark set.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    version: 1,
                    marks: BTreeMap::new(),
                });
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn get(&self, project_path: &str) -> Option<&str> {
        self.marks.get(project_path).map(String::as_str)
    }

    /// Move a project's mark forward. Never moves backward: an older batch
    /// result cannot un-process newer sessions.
    pub fn advance(&mut self, project_path: &str, modified: &str) {
        match self.marks.get(project_path) {
            Some(current) if current.as_str() >= modified => {}
            _ => {
                self.marks
                    .insert(project_path.to_string(), modified.to_string());
            }
        }
    }
}
