//! Sync mapping and remote workspace configuration.
//!
//! A [`SyncMapping`] pairs one local directory with one remote target and a
//! direction; [`RemoteConfig`] bundles credentials, the mapping list and the
//! retry/timeout policy. Validation fails fast before any sync attempt.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::filters::PatternSet;

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
pub const DEFAULT_API_VERSION: &str = "2022-06-28";

/// Direction of synchronization for one mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Bidirectional,
    UploadOnly,
    DownloadOnly,
}

impl SyncMode {
    pub fn uploads(self) -> bool {
        matches!(self, SyncMode::Bidirectional | SyncMode::UploadOnly)
    }

    pub fn downloads(self) -> bool {
        matches!(self, SyncMode::Bidirectional | SyncMode::DownloadOnly)
    }
}

/// What to do when bidirectional sync finds divergent edits on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The more recently modified side overwrites the other. The losing
    /// side's content is discarded, not merged.
    #[default]
    LastWriterWins,
    /// Surface a conflict and wait for an explicit resolution call.
    Manual,
}

fn default_file_patterns() -> Vec<String> {
    vec!["*.md".into(), "*.txt".into(), "*.rst".into()]
}

fn default_ignore_patterns() -> Vec<String> {
    vec![".*".into(), "*.tmp".into(), "*.bak".into(), "__pycache__".into()]
}

/// Pairing between a local directory and a remote page/database target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMapping {
    pub source_path: PathBuf,
    pub target_id: String,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default = "default_file_patterns")]
    pub file_patterns: Vec<String>,
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SyncMapping {
    pub fn new(source_path: impl Into<PathBuf>, target_id: impl Into<String>) -> Self {
        SyncMapping {
            source_path: source_path.into(),
            target_id: target_id.into(),
            sync_mode: SyncMode::default(),
            file_patterns: default_file_patterns(),
            ignore_patterns: default_ignore_patterns(),
            metadata: HashMap::new(),
        }
    }

    /// Fail fast on a missing source directory or an empty target id.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.source_path.exists() {
            return Err(SyncError::Configuration(format!(
                "source path does not exist: {}",
                self.source_path.display()
            )));
        }
        if !self.source_path.is_dir() {
            return Err(SyncError::Configuration(format!(
                "source path must be a directory: {}",
                self.source_path.display()
            )));
        }
        if self.target_id.is_empty() {
            return Err(SyncError::Configuration(
                "target id must not be empty".to_string(),
            ));
        }
        debug!(
            source = %self.source_path.display(),
            target_id = %self.target_id,
            mode = ?self.sync_mode,
            "mapping validated"
        );
        Ok(())
    }

    pub fn patterns(&self) -> SyncResult<PatternSet> {
        PatternSet::compile(&self.file_patterns, &self.ignore_patterns)
    }
}

/// Per-call timeout settings, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub connect: u64,
    pub read: u64,
    pub write: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            connect: 10,
            read: 30,
            write: 30,
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

/// Top-level configuration for the remote workspace integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub token: String,
    pub workspace_id: String,
    pub mappings: Vec<SyncMapping>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between retries, in seconds (not exponential).
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

impl RemoteConfig {
    pub fn new(
        token: impl Into<String>,
        workspace_id: impl Into<String>,
        mappings: Vec<SyncMapping>,
    ) -> Self {
        RemoteConfig {
            token: token.into(),
            workspace_id: workspace_id.into(),
            mappings,
            base_url: default_base_url(),
            api_version: default_api_version(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            timeout: TimeoutConfig::default(),
            conflict_policy: ConflictPolicy::default(),
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.token.is_empty() {
            return Err(SyncError::Configuration("token is required".to_string()));
        }
        if self.workspace_id.is_empty() {
            return Err(SyncError::Configuration(
                "workspace id is required".to_string(),
            ));
        }
        if self.mappings.is_empty() {
            return Err(SyncError::Configuration(
                "at least one mapping is required".to_string(),
            ));
        }
        for mapping in &self.mappings {
            mapping.validate()?;
        }
        info!(
            mappings = self.mappings.len(),
            base_url = %self.base_url,
            "remote configuration validated"
        );
        Ok(())
    }

    /// Request headers for the remote API.
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), format!("Bearer {}", self.token)),
            ("Notion-Version".to_string(), self.api_version.clone()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }

    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }
}
