// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! The iteration facade (C10, §4.10): hidden-refs filtering over
//! [`Backend::for_each_ref`], "do what I mean" short-name resolution, and
//! its inverse, shortening a full refname back to the shortest unambiguous
//! form.
//!
//! Grounded on `link-git::refs::db::Snapshot`'s iteration shape, generalized
//! from a single `gitoxide`-backed store to any [`Backend`].

use std::sync::Arc;

use refstore_core::{
    backend::{Backend, ForEachRefFn},
    error::{Error, Result},
    name::{RefStr, RefString},
    resolve::{resolve, Resolved},
    transaction::ResolveFlags,
};

use crate::config::Config;

/// The fixed rule list `dwim_ref` tries, in priority order (§4.10).
const DWIM_RULES: &[&str] = &[
    "%s",
    "refs/%s",
    "refs/tags/%s",
    "refs/heads/%s",
    "refs/remotes/%s",
    "refs/remotes/%s/HEAD",
];

pub struct Dwim {
    pub name: RefString,
    /// Other candidates that also existed, most-preferred first; non-empty
    /// only when the match was ambiguous.
    pub ambiguous: Vec<RefString>,
}

/// Ordered iteration over refs under `prefix`, applying `config`'s
/// `hideRefs` list unless `include_hidden` is set. `trim` and `flags` are
/// passed straight through to the backend (§4.10 `INCLUDE_BROKEN`
/// passthrough).
pub fn for_each_ref(
    backend: &dyn Backend,
    config: &Config,
    prefix: &str,
    trim: usize,
    flags: ResolveFlags,
    include_hidden: bool,
    f: &mut ForEachRefFn<'_>,
) -> Result<i32> {
    if include_hidden || config.hide_refs.is_empty() {
        return backend.for_each_ref(prefix, trim, flags, f);
    }

    backend.for_each_ref(prefix, 0, flags, &mut |name, oid, rflags| {
        if config.hide_refs.hides(name.as_str()) {
            return 0;
        }
        let trimmed = &name.as_str()[trim.min(name.as_str().len())..];
        f(RefStr::from_str_unchecked(trimmed), oid, rflags)
    })
}

/// §4.10 "do what I mean": expand a short name into the first rule in
/// [`DWIM_RULES`] under which a ref of that name actually exists.
pub fn dwim_ref(backend: &dyn Backend, short: &str) -> Result<Dwim> {
    let mut found = Vec::new();
    for rule in DWIM_RULES {
        let candidate = rule.replacen("%s", short, 1);
        let Ok(candidate) = RefStr::try_from_str(&candidate) else {
            continue;
        };
        if backend.read_raw_ref(candidate)?.is_some() {
            found.push(candidate.to_ref_string());
        }
    }

    let mut found = found.into_iter();
    match found.next() {
        None => Err(Error::NotFound(short.to_owned())),
        Some(name) => Ok(Dwim {
            name,
            ambiguous: found.collect(),
        }),
    }
}

/// The inverse of [`dwim_ref`]: the shortest prefix-stripped form of `name`
/// that a subsequent `dwim_ref` call would resolve back to `name`.
///
/// §4.10: a candidate is rejected if any rule ahead of the one it matched
/// also resolves under that backend - that ref would shadow it in
/// [`dwim_ref`]'s priority order regardless of `strict`. With `strict` set,
/// the check widens to *every* other rule, including ones behind the match,
/// so the returned name is unambiguous against the full rule set, not just
/// the higher-priority prefix.
pub fn shorten_unambiguous_ref(backend: &dyn Backend, name: &RefStr, strict: bool) -> Result<RefString> {
    // Try the most specific rule first, so the most aggressively shortened
    // form wins; skip the trivial identity rule ("%s"), which never
    // actually shortens anything.
    for (idx, rule) in DWIM_RULES[1..].iter().enumerate().rev() {
        let prefix = rule.strip_suffix("%s").unwrap_or(rule);
        let suffix = rule.strip_prefix("%s").unwrap_or("");
        let Some(short) = name
            .as_str()
            .strip_prefix(prefix)
            .and_then(|s| s.strip_suffix(suffix))
        else {
            continue;
        };
        if short.is_empty() {
            continue;
        }

        // Rules preceding this one in DWIM_RULES outrank it; one of them
        // matching first would make `dwim_ref(short)` resolve to a different
        // ref than `name`, so the short form is unsound to hand back
        // regardless of `strict`.
        let shadowed_by_earlier_rule = DWIM_RULES[..idx + 1].iter().any(|earlier| {
            let candidate = earlier.replacen("%s", short, 1);
            RefStr::try_from_str(&candidate)
                .ok()
                .and_then(|c| backend.read_raw_ref(c).ok().flatten())
                .is_some()
        });
        if shadowed_by_earlier_rule {
            continue;
        }

        if !strict {
            return Ok(RefString::try_from(short)
                .unwrap_or_else(|_| name.to_ref_string()));
        }

        match dwim_ref(backend, short) {
            Ok(dwim) if dwim.name.as_refstr() == name && dwim.ambiguous.is_empty() => {
                return Ok(dwim.name);
            },
            _ => continue,
        }
    }
    Ok(name.to_ref_string())
}

/// §1.2 expansion: resolve a ref inside a submodule, after the caller has
/// already validated (via [`crate::registry::Registry::validate_submodule_backend`])
/// that the submodule's configured backend agrees with the parent's.
pub fn resolve_gitlink_ref(
    submodule_backend: &Arc<dyn Backend>,
    name: &RefStr,
    flags: ResolveFlags,
) -> Result<Resolved> {
    resolve(submodule_backend.as_ref(), name, flags)
}

#[cfg(test)]
mod tests {
    use refstore_core::oid::Oid;
    use refstore_files::FilesBackend;
    use tempfile::tempdir;

    use super::*;

    fn rs(s: &str) -> RefString {
        RefString::try_from(s).unwrap()
    }

    fn oid(b: u8) -> Oid {
        Oid::from_bytes(&[b; 20]).unwrap()
    }

    fn backend() -> (tempfile::TempDir, FilesBackend) {
        let dir = tempdir().unwrap();
        let b = FilesBackend::new(dir.path(), "Test User <test@example.com>");
        b.init_db().unwrap();
        (dir, b)
    }

    #[test]
    fn dwim_prefers_refs_heads() {
        let (_dir, backend) = backend();
        let mut tx = refstore_core::transaction::Transaction::new();
        tx.create(rs("refs/heads/main").as_refstr(), oid(1), None).unwrap();
        let affected = tx.check_unique().unwrap();
        backend.commit(&mut tx, &affected).unwrap();

        let dwim = dwim_ref(&backend, "main").unwrap();
        assert_eq!(dwim.name.as_refstr(), rs("refs/heads/main").as_refstr());
        assert!(dwim.ambiguous.is_empty());
    }

    #[test]
    fn dwim_missing_is_not_found() {
        let (_dir, backend) = backend();
        assert!(dwim_ref(&backend, "nope").is_err());
    }

    #[test]
    fn dwim_reports_ambiguity() {
        let (_dir, backend) = backend();
        let mut tx = refstore_core::transaction::Transaction::new();
        tx.create(rs("refs/heads/main").as_refstr(), oid(1), None).unwrap();
        tx.create(rs("refs/tags/main").as_refstr(), oid(2), None).unwrap();
        let affected = tx.check_unique().unwrap();
        backend.commit(&mut tx, &affected).unwrap();

        let dwim = dwim_ref(&backend, "main").unwrap();
        assert_eq!(dwim.name.as_refstr(), rs("refs/tags/main").as_refstr());
        assert_eq!(dwim.ambiguous.len(), 1);
    }

    #[test]
    fn shorten_roundtrips_through_dwim() {
        let (_dir, backend) = backend();
        let mut tx = refstore_core::transaction::Transaction::new();
        tx.create(rs("refs/heads/main").as_refstr(), oid(1), None).unwrap();
        let affected = tx.check_unique().unwrap();
        backend.commit(&mut tx, &affected).unwrap();

        let short = shorten_unambiguous_ref(&backend, rs("refs/heads/main").as_refstr(), true).unwrap();
        let dwim = dwim_ref(&backend, short.as_refstr().as_str()).unwrap();
        assert_eq!(dwim.name.as_refstr(), rs("refs/heads/main").as_refstr());
    }

    #[test]
    fn hidden_refs_are_skipped_by_for_each_ref() {
        let (_dir, backend) = backend();
        let mut tx = refstore_core::transaction::Transaction::new();
        tx.create(rs("refs/heads/main").as_refstr(), oid(1), None).unwrap();
        tx.create(rs("refs/remote-tracking/origin/main").as_refstr(), oid(2), None)
            .unwrap();
        let affected = tx.check_unique().unwrap();
        backend.commit(&mut tx, &affected).unwrap();

        let mut config = Config::default();
        config.hide_refs = crate::config::HideRefs::parse(["refs/remote-tracking"]);

        let mut seen = Vec::new();
        for_each_ref(&backend, &config, "", 0, ResolveFlags::empty(), false, &mut |name, _, _| {
            seen.push(name.as_str().to_owned());
            0
        })
        .unwrap();

        assert!(seen.contains(&"refs/heads/main".to_owned()));
        assert!(!seen.iter().any(|n| n.starts_with("refs/remote-tracking")));
    }
}
