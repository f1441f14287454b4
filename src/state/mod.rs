//! Saved sessions
//!
//! A placed treasure is fetched again later by resuming its session, so the
//! credentials and the coordinate are kept on disk, one JSON file per tick.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::map::Coordinate;
use crate::network::{ClientResult, SessionCredentials};

/// State errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session ids are not printable: {0}")]
    NotText(#[from] std::string::FromUtf8Error),

    #[error("No data directory available")]
    NoDataDir,
}

pub type StateResult<T> = Result<T, StateError>;

/// Everything needed to come back to a placed treasure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSession {
    pub public_id: String,
    pub private_id: String,
    pub coords: Coordinate,
}

impl SavedSession {
    pub fn new(credentials: &SessionCredentials, coords: Coordinate) -> StateResult<Self> {
        Ok(Self {
            public_id: String::from_utf8(credentials.public_id().to_vec())?,
            private_id: String::from_utf8(credentials.private_id().to_vec())?,
            coords,
        })
    }

    pub fn credentials(&self) -> ClientResult<SessionCredentials> {
        SessionCredentials::new(self.public_id.as_bytes(), self.private_id.as_bytes())
    }
}

/// Directory of saved sessions
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$DATA_DIR/treasurehunt`
    pub fn open_default() -> StateResult<Self> {
        let root = dirs::data_dir().ok_or(StateError::NoDataDir)?;
        Ok(Self::new(root.join("treasurehunt")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, tick: u64) -> PathBuf {
        self.root.join(format!("tick-{}.json", tick))
    }

    pub fn save(&self, tick: u64, session: &SavedSession) -> StateResult<()> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.path(tick);
        std::fs::write(&path, serde_json::to_vec_pretty(session)?)?;
        tracing::debug!("Saved session {} to {}", session.public_id, path.display());
        Ok(())
    }

    /// `None` when nothing was saved for `tick`
    pub fn load(&self, tick: u64) -> StateResult<Option<SavedSession>> {
        let contents = match std::fs::read(self.path(tick)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    pub fn remove(&self, tick: u64) -> StateResult<()> {
        match std::fs::remove_file(self.path(tick)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
