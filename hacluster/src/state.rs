//! Persisted cluster configuration state.
//!
//! A single-bit state machine: the node is either unconfigured or has
//! completed resource reconciliation at least once. The transition is
//! one-way under normal operation; clearing it is an out-of-band recovery
//! action.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::corosync::atomic_write;
use crate::error::HaResult;

/// Default location of the configured marker
pub const DEFAULT_MARKER_PATH: &str = "/var/lib/hacluster/configured";

/// Whether resource reconciliation has completed on this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// No reconciliation pass has completed yet
    Unconfigured,
    /// Resources have been configured at least once
    Configured,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Unconfigured => write!(f, "unconfigured"),
            ClusterState::Configured => write!(f, "configured"),
        }
    }
}

/// Store persisting the [`ClusterState`] marker across invocations
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl Default for StateStore {
    fn default() -> Self {
        StateStore {
            path: PathBuf::from(DEFAULT_MARKER_PATH),
        }
    }
}

impl StateStore {
    /// Store at the standard system location
    pub fn new() -> Self {
        Self::default()
    }

    /// Store at an explicit marker path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    /// Marker path backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state
    pub fn load(&self) -> HaResult<ClusterState> {
        match self.path.try_exists()? {
            true => Ok(ClusterState::Configured),
            false => Ok(ClusterState::Unconfigured),
        }
    }

    /// Transition to [`ClusterState::Configured`], atomically and
    /// idempotently
    pub fn mark_configured(&self) -> HaResult<()> {
        atomic_write(&self.path, b"configured\n", 0o644)?;
        log::info!("Persisted cluster state: {}", ClusterState::Configured);
        Ok(())
    }
}
