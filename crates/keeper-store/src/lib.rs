//! Store composition: physical sub-stores and the root store that mounts
//! them under one namespace.

pub mod paths;
pub mod root;
pub mod sub;

use std::{fmt, io, path::PathBuf};

use keeper_core::{context::Cancelled, crypto::CryptoError};
use keeper_sync::SyncError;
use thiserror::Error;

pub use root::{Opened, Resolved, RootStore, SkippedMount, Wiring};
pub use sub::SubStore;

/// Aliases whose stores share one physical directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConflict {
    pub path: PathBuf,
    pub aliases: Vec<String>,
}

impl fmt::Display for PathConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} all resolve to {}", self.aliases, self.path.display())
    }
}

fn join_conflicts(conflicts: &[PathConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
    #[error("failed to initialize store at {}: {source}", path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: Box<StoreError>,
    },
    #[error("mount conflict: {}", join_conflicts(conflicts))]
    MountConflict { conflicts: Vec<PathConflict> },
    #[error("no mount named {alias:?}")]
    NotMounted { alias: String },
    #[error("{alias:?} is already mounted")]
    AlreadyMounted { alias: String },
    #[error("invalid mount alias {alias:?}: {reason}")]
    InvalidAlias { alias: String, reason: String },
    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("entry {name} not found")]
    NotFound { name: String },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("store i/o: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl StoreError {
    /// Wrap `self` as the cause of a failed store construction at `path`.
    pub fn init_at(self, path: impl Into<PathBuf>) -> Self {
        StoreError::Init {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// True if the operation stopped because its context was cancelled or expired,
    /// whichever layer noticed it.
    pub fn is_cancelled(&self) -> bool {
        match self {
            StoreError::Cancelled(_)
            | StoreError::Crypto(CryptoError::Cancelled(_))
            | StoreError::Sync(SyncError::Cancelled(_)) => true,
            StoreError::Init { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
