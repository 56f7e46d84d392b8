//! Session persistence.
//!
//! The host stores two opaque JSON blobs: the chat blob holding the whole
//! aggregate, and a small per-turn blob holding the player's position.

use crate::graph::{GraphError, NodeId};
use crate::session::SessionState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Saved story is corrupt: {0}")]
    Corrupt(#[from] GraphError),
}

/// Current save format version.
pub const SAVE_VERSION: u32 = 1;

/// A saved session with all state needed to resume play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSession {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created, in seconds since the Unix epoch.
    pub saved_at: String,

    /// The complete session aggregate.
    pub state: SessionState,
}

impl SavedSession {
    pub fn new(state: SessionState) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at: timestamp(),
            state,
        }
    }
}

/// The player's position, saved once per turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    pub active: NodeId,
    pub read: bool,
}

impl TurnState {
    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(blob: &str) -> Result<Self, PersistError> {
        Ok(serde_json::from_str(blob)?)
    }
}

/// Serialize a session aggregate into a chat blob.
pub fn to_json(state: &SessionState) -> Result<String, PersistError> {
    #[derive(Serialize)]
    struct Borrowed<'a> {
        version: u32,
        saved_at: String,
        state: &'a SessionState,
    }

    Ok(serde_json::to_string(&Borrowed {
        version: SAVE_VERSION,
        saved_at: timestamp(),
        state,
    })?)
}

/// Load a chat blob, checking its version and graph integrity.
pub fn from_json(blob: &str) -> Result<SessionState, PersistError> {
    // Check the version before parsing the rest, so an incompatible save
    // reports a mismatch rather than a confusing field error.
    #[derive(Deserialize)]
    struct Version {
        version: u32,
    }

    let Version { version } = serde_json::from_str(blob)?;
    if version != SAVE_VERSION {
        return Err(PersistError::VersionMismatch {
            expected: SAVE_VERSION,
            found: version,
        });
    }

    let saved: SavedSession = serde_json::from_str(blob)?;
    saved.state.graph.validate()?;
    Ok(saved.state)
}

fn timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_secs())
}
