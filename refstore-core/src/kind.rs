// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! Classify a refname into one of the three kinds distinguished by §3: a
//! refname's kind alone determines which backend services it - non-normal
//! refs are always routed to the files backend, regardless of which backend
//! is configured for normal refs (§4.2).

use crate::name::{check, str, RefStr};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    /// Scoped to a single worktree: `HEAD`, or anything under `refs/bisect/`.
    PerWorktree,
    /// An all-caps name stored as a plain file, e.g. `FETCH_HEAD`.
    Pseudoref,
    /// Everything else; must live under `refs/...`.
    Normal,
}

impl Kind {
    /// Always serviced by the files backend, irrespective of the configured
    /// backend for [`Kind::Normal`] refs.
    pub fn always_files_backend(self) -> bool {
        !matches!(self, Kind::Normal)
    }
}

pub fn classify(name: &RefStr) -> Kind {
    let s = name.as_str();
    if s == str::HEAD || is_under_bisect(s) {
        Kind::PerWorktree
    } else if check::is_pseudoref_form(s) {
        Kind::Pseudoref
    } else {
        Kind::Normal
    }
}

fn is_under_bisect(s: &str) -> bool {
    s.strip_prefix("refs/bisect/").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rs(s: &str) -> crate::name::RefString {
        crate::name::RefString::try_from(s).unwrap()
    }

    #[test]
    fn head_is_per_worktree() {
        assert_eq!(classify(rs("HEAD").as_refstr()), Kind::PerWorktree);
    }

    #[test]
    fn bisect_is_per_worktree() {
        assert_eq!(
            classify(rs("refs/bisect/bad").as_refstr()),
            Kind::PerWorktree
        );
    }

    #[test]
    fn fetch_head_is_pseudoref() {
        assert_eq!(classify(rs("FETCH_HEAD").as_refstr()), Kind::Pseudoref);
    }

    #[test]
    fn branch_is_normal() {
        assert_eq!(classify(rs("refs/heads/main").as_refstr()), Kind::Normal);
    }

    #[test]
    fn non_normal_always_routes_to_files() {
        assert!(Kind::PerWorktree.always_files_backend());
        assert!(Kind::Pseudoref.always_files_backend());
        assert!(!Kind::Normal.always_files_backend());
    }
}
