use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from `worklog.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorklogConfig {
    /// Default log level when `RUST_LOG` is not set.
    pub log_level: String,

    pub memory: MemoryConfig,
    pub session_paths: SessionPathsConfig,
    pub sanitization: SanitizationConfig,
    pub enrichment: EnrichmentConfig,
    pub concurrency: ConcurrencyConfig,
}

impl Default for WorklogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            memory: MemoryConfig::default(),
            session_paths: SessionPathsConfig::default(),
            sanitization: SanitizationConfig::default(),
            enrichment: EnrichmentConfig::default(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

impl WorklogConfig {
    /// Resolve the session store base directory, expanding `~`.
    pub fn resolved_session_base(&self) -> PathBuf {
        expand_tilde(&self.session_paths.claude_code)
    }

    /// Resolve the log level string.
    pub fn resolved_log_level(&self) -> &str {
        &self.log_level
    }

    /// Reject configurations that cannot produce any work. Missing credentials
    /// or a missing session base directory abort the batch before it starts.
    pub fn validate(&self) -> Result<()> {
        if self.memory.url.trim().is_empty() {
            anyhow::bail!("memory.url is not configured");
        }
        if self.memory.api_key.trim().is_empty() {
            anyhow::bail!("memory.api_key is not configured");
        }
        if self.enrichment.url.trim().is_empty() {
            anyhow::bail!("enrichment.url is not configured");
        }
        if self.enrichment.model.trim().is_empty() {
            anyhow::bail!("enrichment.model is not configured");
        }
        if self.enrichment.api_key.trim().is_empty() {
            anyhow::bail!("enrichment.api_key is not configured");
        }
        let base = self.resolved_session_base();
        if !base.is_dir() {
            anyhow::bail!("session base directory does not exist: {}", base.display());
        }
        Ok(())
    }
}

/// Remote content store (the document sink).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub url: String,
    pub api_key: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionPathsConfig {
    /// Base directory of the coding-assistant session store.
    pub claude_code: String,
}

impl Default for SessionPathsConfig {
    fn default() -> Self {
        Self {
            claude_code: "~/.claude/projects".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SanitizationConfig {
    pub blocked_projects: Vec<String>,
    pub blocked_paths: Vec<String>,
    pub blocked_domains: Vec<String>,
    /// Literal substitutions applied after the regex redaction pass.
    pub redacted_terms: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub provider: String,
    pub url: String,
    pub model: String,
    pub api_key: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            provider: "ai-gateway".to_string(),
            url: String::new(),
            model: String::new(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub workers: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Returns the default config file path: `~/.worklog/worklog.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".worklog")
        .join("worklog.toml")
}

/// Returns the default high-water-mark state path: `~/.worklog/state.json`.
pub fn default_state_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".worklog")
        .join("state.json")
}

/// Load configuration from a TOML file.
///
/// - If `path` is `Some`, reads that file (errors if missing or invalid).
/// - If `path` is `None`, tries the default path; returns defaults if the file doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<WorklogConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path(),
    };

    if !config_path.exists() {
        if path.is_some() {
            // User explicitly specified a path that doesn't exist — error
            anyhow::bail!("config file not found: {}", config_path.display());
        }
        // Default path doesn't exist — use defaults
        return Ok(WorklogConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config file: {}", config_path.display()))?;

    let config: WorklogConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", config_path.display()))?;

    Ok(config)
}
