// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! The error taxonomy of §7, shared by every backend and by the coordinator.

use thiserror::Error;

use crate::name;

/// One of the named error kinds of §7, carried alongside a human-readable
/// message. `Bug` is not represented here: it is a programmer-facing
/// invariant violation and is raised as a panic, not a `Result`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid refname: {0}")]
    BadName(#[from] name::Error),

    #[error("{0}")]
    LockError(String),

    #[error("refname {refname:?} conflicts with an existing ref")]
    NameConflict { refname: String },

    #[error("reference {0:?} not found")]
    NotFound(String),

    #[error("reference {refname:?} is broken: {reason}")]
    Broken { refname: String, reason: String },

    #[error("symref chain for {0:?} exceeded the maximum depth or cycled")]
    TooDeep(String),

    #[error("{0}")]
    Generic(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::LockError(msg.into())
    }

    pub fn name_conflict(refname: impl Into<String>) -> Self {
        Self::NameConflict {
            refname: refname.into(),
        }
    }

    pub fn broken(refname: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Broken {
            refname: refname.into(),
            reason: reason.into(),
        }
    }

    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A non-fatal warning surfaced alongside an otherwise successful commit
/// (§7 "dedicated side channel"). Never merged into [`Error`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Warning {
    /// §4.9 step 5: the primary backend committed but the files-backend
    /// sub-transaction for per-worktree/pseudoref updates failed.
    SplitCommitFailed { reason: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Warning::SplitCommitFailed { reason } => write!(
                f,
                "A ref transaction was split across two refs backends. Part of the \
                 transaction succeeded, but then the update to the per-worktree refs \
                 failed ({reason}). Your repository may be in an inconsistent state."
            ),
        }
    }
}
