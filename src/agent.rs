//! Per-document synchronization agents and their state machine.
//!
//! An agent owns exactly one [`AgentState`]; transitions follow a strict
//! table (current state × event → next state) and an invalid transition is a
//! programming error, not a recoverable one. Every transition is logged with
//! the agent id and the document path it concerns.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::bridge::{MappingStatus, SyncBridge};
use crate::client::RemoteApi;
use crate::error::{SyncError, SyncResult};

/// Synchronization state of one document, owned by one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Syncing,
    Error,
    Conflict,
    Waiting,
    Completed,
}

/// Events driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    Start,
    Complete,
    Fail,
    ConflictDetected,
    AwaitResolution,
}

impl AgentState {
    /// The transition table. `None` means the transition is invalid.
    ///
    /// `idle → syncing → {completed, error, conflict}`;
    /// `conflict → waiting → syncing`. `completed` and `error` are terminal
    /// for the attempt but a new attempt may start from either.
    pub fn next(self, event: AgentEvent) -> Option<AgentState> {
        use AgentEvent::*;
        use AgentState::*;
        match (self, event) {
            (Idle | Completed | Error | Waiting, Start) => Some(Syncing),
            (Syncing, Complete) => Some(Completed),
            (Syncing, Fail) => Some(Error),
            (Syncing, ConflictDetected) => Some(Conflict),
            (Conflict, AwaitResolution) => Some(Waiting),
            _ => None,
        }
    }
}

/// Capability flags gating which operations an agent supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub sync: bool,
    pub conflict_resolution: bool,
    pub version_control: bool,
    pub collaborative: bool,
    pub ai_enhanced: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            sync: true,
            conflict_resolution: false,
            version_control: false,
            collaborative: false,
            ai_enhanced: false,
        }
    }
}

/// Point-in-time view of an agent.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub state: AgentState,
    pub capabilities: Capabilities,
    pub workspace: PathBuf,
}

/// Which side wins an explicit conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    KeepLocal,
    KeepRemote,
}

/// Version information for one document, both sides.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub local_modified: Option<DateTime<Utc>>,
    pub remote_edited: Option<DateTime<Utc>>,
}

/// Contract all agent implementations fulfil. Operations beyond `sync` are
/// gated by the advertised capabilities.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SyncAgent: Send + Sync {
    async fn sync(&self, doc_path: &Path) -> SyncResult<()>;

    async fn resolve_conflict(
        &self,
        doc_path: &Path,
        resolution: ConflictResolution,
    ) -> SyncResult<()>;

    async fn check_version(&self, doc_path: &Path) -> SyncResult<VersionInfo>;

    fn snapshot(&self) -> AgentSnapshot;
}

/// Shared identity + state cell for concrete agents.
struct AgentCore {
    agent_id: String,
    workspace: PathBuf,
    capabilities: Capabilities,
    state: Mutex<AgentState>,
}

impl AgentCore {
    fn new(agent_id: String, workspace: PathBuf, capabilities: Capabilities) -> Self {
        AgentCore {
            agent_id,
            workspace,
            capabilities,
            state: Mutex::new(AgentState::Idle),
        }
    }

    /// Apply one event; panics on an invalid transition (programming error).
    fn transition(&self, event: AgentEvent, doc_path: &Path) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let next = state.next(event).unwrap_or_else(|| {
            panic!(
                "invalid agent state transition: {:?} on {:?} (agent {})",
                event, *state, self.agent_id
            )
        });
        info!(
            agent_id = %self.agent_id,
            doc = %doc_path.display(),
            from = ?*state,
            to = ?next,
            "agent state transition"
        );
        *state = next;
    }

    fn state(&self) -> AgentState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn require(&self, enabled: bool, what: &str) -> SyncResult<()> {
        if enabled {
            Ok(())
        } else {
            Err(SyncError::Configuration(format!(
                "agent {} does not support {what}",
                self.agent_id
            )))
        }
    }
}

/// Agent backed by a [`SyncBridge`]: drives the state machine around the
/// bridge's per-path sync and resolution operations.
pub struct BridgeAgent<C: RemoteApi> {
    core: AgentCore,
    bridge: SyncBridge<C>,
}

impl<C: RemoteApi> BridgeAgent<C> {
    pub fn new(
        agent_id: impl Into<String>,
        workspace: impl Into<PathBuf>,
        capabilities: Capabilities,
        bridge: SyncBridge<C>,
    ) -> Self {
        BridgeAgent {
            core: AgentCore::new(agent_id.into(), workspace.into(), capabilities),
            bridge,
        }
    }

    /// Convenience constructor with a generated agent id.
    pub fn with_generated_id(
        workspace: impl Into<PathBuf>,
        capabilities: Capabilities,
        bridge: SyncBridge<C>,
    ) -> Self {
        Self::new(
            format!("agent-{}", uuid::Uuid::new_v4()),
            workspace,
            capabilities,
            bridge,
        )
    }

    pub fn bridge(&self) -> &SyncBridge<C> {
        &self.bridge
    }
}

#[async_trait]
impl<C: RemoteApi> SyncAgent for BridgeAgent<C> {
    async fn sync(&self, doc_path: &Path) -> SyncResult<()> {
        self.core.require(self.core.capabilities.sync, "sync")?;
        self.core.transition(AgentEvent::Start, doc_path);
        match self.bridge.sync_path(doc_path).await {
            Ok(report) => {
                if let Some(report) = &report {
                    if let MappingStatus::Conflict(path) = &report.status {
                        self.core.transition(AgentEvent::ConflictDetected, doc_path);
                        return Err(SyncError::Conflict { path: path.clone() });
                    }
                }
                self.core.transition(AgentEvent::Complete, doc_path);
                Ok(())
            }
            Err(SyncError::Conflict { path }) => {
                self.core.transition(AgentEvent::ConflictDetected, doc_path);
                Err(SyncError::Conflict { path })
            }
            Err(e) => {
                self.core.transition(AgentEvent::Fail, doc_path);
                Err(e)
            }
        }
    }

    async fn resolve_conflict(
        &self,
        doc_path: &Path,
        resolution: ConflictResolution,
    ) -> SyncResult<()> {
        self.core.require(
            self.core.capabilities.conflict_resolution,
            "conflict resolution",
        )?;
        self.core.transition(AgentEvent::AwaitResolution, doc_path);
        self.core.transition(AgentEvent::Start, doc_path);
        let result = match resolution {
            ConflictResolution::KeepLocal => self.bridge.force_upload(doc_path).await,
            ConflictResolution::KeepRemote => self.bridge.force_download(doc_path).await,
        };
        match result {
            Ok(()) => {
                self.core.transition(AgentEvent::Complete, doc_path);
                Ok(())
            }
            Err(e) => {
                self.core.transition(AgentEvent::Fail, doc_path);
                Err(e)
            }
        }
    }

    async fn check_version(&self, doc_path: &Path) -> SyncResult<VersionInfo> {
        self.core
            .require(self.core.capabilities.version_control, "version checks")?;
        let local_modified = match std::fs::metadata(doc_path) {
            Ok(meta) => Some(DateTime::<Utc>::from(meta.modified()?)),
            Err(_) => None,
        };
        let remote_edited = self
            .bridge
            .remote_counterpart(doc_path)
            .await?
            .map(|page| page.last_edited_time);
        Ok(VersionInfo {
            local_modified,
            remote_edited,
        })
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: self.core.agent_id.clone(),
            state: self.core.state(),
            capabilities: self.core.capabilities,
            workspace: self.core.workspace.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        use AgentEvent::*;
        use AgentState::*;
        assert_eq!(Idle.next(Start), Some(Syncing));
        assert_eq!(Syncing.next(Complete), Some(Completed));
        assert_eq!(Syncing.next(Fail), Some(Error));
        assert_eq!(Syncing.next(ConflictDetected), Some(Conflict));
        assert_eq!(Conflict.next(AwaitResolution), Some(Waiting));
        assert_eq!(Waiting.next(Start), Some(Syncing));
        assert_eq!(Completed.next(Start), Some(Syncing));
        assert_eq!(Error.next(Start), Some(Syncing));
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        use AgentEvent::*;
        use AgentState::*;
        assert_eq!(Idle.next(Complete), None);
        assert_eq!(Completed.next(Complete), None);
        assert_eq!(Conflict.next(Start), None);
        assert_eq!(Waiting.next(AwaitResolution), None);
    }

    #[test]
    #[should_panic(expected = "invalid agent state transition")]
    fn core_panics_on_invalid_transition() {
        let core = AgentCore::new(
            "agent-1".to_string(),
            PathBuf::from("/tmp"),
            Capabilities::default(),
        );
        core.transition(AgentEvent::Complete, Path::new("doc.md"));
    }

    #[test]
    fn default_capabilities_only_advertise_sync() {
        let caps = Capabilities::default();
        assert!(caps.sync);
        assert!(!caps.conflict_resolution);
        assert!(!caps.version_control);
        assert!(!caps.collaborative);
        assert!(!caps.ai_enhanced);
    }

    #[test]
    fn core_tracks_state_through_a_sync_attempt() {
        let core = AgentCore::new(
            "agent-2".to_string(),
            PathBuf::from("/tmp"),
            Capabilities::default(),
        );
        let doc = Path::new("doc.md");
        assert_eq!(core.state(), AgentState::Idle);
        core.transition(AgentEvent::Start, doc);
        assert_eq!(core.state(), AgentState::Syncing);
        core.transition(AgentEvent::ConflictDetected, doc);
        assert_eq!(core.state(), AgentState::Conflict);
        core.transition(AgentEvent::AwaitResolution, doc);
        core.transition(AgentEvent::Start, doc);
        core.transition(AgentEvent::Complete, doc);
        assert_eq!(core.state(), AgentState::Completed);
    }
}
