// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! The filesystem-backed reference store engine: loose + packed refs (C6).
//! `HEAD`/`FETCH_HEAD`/`MERGE_HEAD` and the rest of C11's per-worktree and
//! pseudoref names are ordinary [`refstore_core::Backend`] updates here -
//! `FilesBackend`'s loose-file path joins the repository root directly onto
//! the name, so a root-level plain file needs no separate code path from a
//! ref under `refs/...`.

pub mod lock;
pub mod loose;
pub mod packed;
pub mod reflog;
mod store;

pub use store::FilesBackend;
