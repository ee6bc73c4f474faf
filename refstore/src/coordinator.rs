// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! The commit pipeline (C9, §4.9): dereference symrefs, split a transaction
//! by ref kind across the configured backend and the files backend, commit
//! each half, and surface a split-commit failure as a warning rather than
//! losing the already-applied half.
//!
//! Generalized from `link_tracking::git::tracking::batch::batch`'s shape -
//! build the updates, hand them to a single `update` call, translate the
//! result - to a two-backend split where the "single `update` call" becomes
//! two, one per backend actually touched.

use std::sync::Arc;

use refstore_core::{
    backend::{Backend, RawValue},
    classify,
    error::{Error, Result, Warning},
    name::{RefStr, RefString},
    oid::Oid,
    resolve::MAX_DEPTH,
    transaction::{Flags, ResolveFlags, Transaction, Update},
};

use crate::{config::Config, registry::Registry};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    /// Ordinary commit: every update is checked against the ref it names
    /// actually existing or not, per its `old?` expectation.
    Normal,
    /// §4.9 "initial ref transaction commit": used only once, while laying
    /// out a fresh repository, and skips that pre-existence bookkeeping.
    Initial,
}

/// Commit `tx` against the backend `config` selects for [`Kind::Normal`]
/// refs, routing non-normal refs to `files` regardless (§4.2).
///
/// On success, returns any non-fatal [`Warning`]s (currently just
/// [`Warning::SplitCommitFailed`]).
pub fn commit(
    registry: &Registry,
    files: &Arc<dyn Backend>,
    tx: Transaction,
    config: &Config,
) -> Result<Vec<Warning>> {
    commit_with(registry, files, tx, config, Mode::Normal)
}

/// The §4.9 "initial ref transaction commit" variant, for laying out a
/// freshly created repository's default refs.
pub fn initial_commit(
    registry: &Registry,
    files: &Arc<dyn Backend>,
    tx: Transaction,
    config: &Config,
) -> Result<Vec<Warning>> {
    commit_with(registry, files, tx, config, Mode::Initial)
}

fn commit_with(
    registry: &Registry,
    files: &Arc<dyn Backend>,
    mut tx: Transaction,
    config: &Config,
    mode: Mode,
) -> Result<Vec<Warning>> {
    let normal_backend = registry.resolve(config.refstorage.as_deref())?;

    dereference_symrefs(normal_backend.as_ref(), files.as_ref(), &mut tx)?;

    // §4.9 step 2: only split when the configured backend actually differs
    // from the files backend - otherwise every update in `tx` is already
    // headed for the same store, and committing it as one transaction keeps
    // the atomicity a split would give up.
    if normal_backend.name() == files.name() {
        tx.begin_commit()?;
        let affected: Vec<RefString> =
            tx.check_unique()?.into_iter().map(ToOwned::to_owned).collect();
        let affected_refs: Vec<&RefStr> = affected.iter().map(|r| r.as_refstr()).collect();
        commit_one(normal_backend.as_ref(), &mut tx, &affected_refs, mode)?;
        tx.close();
        return Ok(Vec::new());
    }

    tx.check_unique()?;
    tx.begin_commit()?;
    let (mut normal_tx, mut files_tx) = split_by_kind(&tx);
    tx.close();

    let mut warnings = Vec::new();

    if !normal_tx.updates().is_empty() {
        normal_tx.begin_commit()?;
        let affected: Vec<RefString> =
            normal_tx.check_unique()?.into_iter().map(ToOwned::to_owned).collect();
        let affected_refs: Vec<&RefStr> = affected.iter().map(|r| r.as_refstr()).collect();
        commit_one(normal_backend.as_ref(), &mut normal_tx, &affected_refs, mode)?;
        normal_tx.close();
    }

    if !files_tx.updates().is_empty() {
        files_tx.begin_commit()?;
        let affected: Vec<RefString> =
            files_tx.check_unique()?.into_iter().map(ToOwned::to_owned).collect();
        let affected_refs: Vec<&RefStr> = affected.iter().map(|r| r.as_refstr()).collect();
        let outcome = commit_one(files.as_ref(), &mut files_tx, &affected_refs, mode);
        files_tx.close();
        match outcome {
            Ok(()) => {},
            Err(e) if !normal_tx.updates().is_empty() => {
                warnings.push(Warning::SplitCommitFailed {
                    reason: e.to_string(),
                });
            },
            Err(e) => return Err(e),
        }
    }

    Ok(warnings)
}

fn commit_one(
    backend: &dyn Backend,
    tx: &mut Transaction,
    affected: &[&RefStr],
    mode: Mode,
) -> Result<()> {
    match mode {
        Mode::Normal => backend.commit(tx, affected),
        Mode::Initial => backend.initial_commit(tx, affected),
    }
}

fn split_by_kind(tx: &Transaction) -> (Transaction, Transaction) {
    let mut normal = Transaction::new();
    let mut files = Transaction::new();
    for update in tx.updates() {
        if classify(update.refname.as_refstr()).always_files_backend() {
            files.updates_mut().push(update.clone());
        } else {
            normal.updates_mut().push(update.clone());
        }
    }
    (normal, files)
}

/// §4.9 step 1: for every update not marked `NODEREF` whose name is
/// currently a symref, follow it to its leaf, record the leaf's current OID
/// as `read_oid`, turn the original update into a `LOG_ONLY|NODEREF` entry
/// (it now only appends a reflog line under the symref's own name), and
/// append a new update that applies the original `new`/`old`/flags directly
/// to the resolved leaf.
fn dereference_symrefs(
    normal_backend: &dyn Backend,
    files_backend: &dyn Backend,
    tx: &mut Transaction,
) -> Result<()> {
    let mut appended: Vec<Update> = Vec::new();

    for update in tx.updates_mut().iter_mut() {
        if update.flags.contains(Flags::NODEREF) {
            continue;
        }

        let backend = if classify(update.refname.as_refstr()).always_files_backend() {
            files_backend
        } else {
            normal_backend
        };

        let raw = backend.read_raw_ref(update.refname.as_refstr())?;
        if !matches!(raw, Some(ref r) if matches!(r.value, RawValue::Symbolic(_))) {
            continue;
        }

        let (name, oid, flags) = resolve_cross_backend(
            normal_backend,
            files_backend,
            update.refname.as_refstr(),
        )?;

        if flags.contains(ResolveFlags::ISBROKEN) {
            return Err(Error::broken(
                update.refname.to_string(),
                "symref target is broken",
            ));
        }

        update.read_oid = oid;

        let mut leaf_flags = update.flags;
        leaf_flags.remove(Flags::LOG_ONLY);
        leaf_flags |= Flags::NODEREF;

        appended.push(Update {
            refname: name,
            new: update.new,
            old: update.old,
            flags: leaf_flags,
            message: update.message.clone(),
            read_oid: oid,
        });

        update.flags |= Flags::LOG_ONLY | Flags::NODEREF;
        update.flags.remove(Flags::HAVE_OLD);
        update.old = None;
    }

    tx.updates_mut().extend(appended);
    Ok(())
}

/// Like `refstore_core::resolve::resolve`, but a symref may legitimately
/// point from a per-worktree/pseudoref name serviced by `files_backend`
/// (e.g. `HEAD`) into a `Kind::Normal` name serviced by `normal_backend`, so
/// each hop picks its backend by the current name's own kind rather than
/// following a single fixed one.
fn resolve_cross_backend(
    normal_backend: &dyn Backend,
    files_backend: &dyn Backend,
    name: &RefStr,
) -> Result<(RefString, Option<Oid>, ResolveFlags)> {
    let mut current = name.to_ref_string();
    let mut seen: Vec<RefString> = vec![current.clone()];

    for hop in 0..=MAX_DEPTH {
        let backend = if classify(current.as_refstr()).always_files_backend() {
            files_backend
        } else {
            normal_backend
        };

        let raw = backend.read_raw_ref(current.as_refstr())?;
        let raw = match raw {
            Some(r) => r,
            None => return Ok((current, None, ResolveFlags::empty())),
        };

        match raw.value {
            RawValue::Direct(oid) => {
                let mut flags = ResolveFlags::empty();
                if oid.is_null() {
                    flags |= ResolveFlags::ISBROKEN;
                }
                return Ok((current, Some(oid), flags));
            },
            RawValue::Symbolic(target) => {
                let target = match RefStr::try_from_str(&target) {
                    Ok(t) => t.to_ref_string(),
                    Err(_) => {
                        return Ok((
                            current,
                            Some(Oid::null()),
                            ResolveFlags::ISBROKEN | ResolveFlags::BAD_NAME,
                        ))
                    },
                };
                if seen.contains(&target) || hop == MAX_DEPTH {
                    return Err(Error::TooDeep(name.to_string()));
                }
                seen.push(target.clone());
                current = target;
            },
        }
    }

    Err(Error::TooDeep(name.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use refstore_files::FilesBackend;
    use tempfile::tempdir;

    use super::*;

    fn oid(b: u8) -> Oid {
        Oid::from_bytes(&[b; 20]).unwrap()
    }

    fn rs(s: &str) -> &'static RefStr {
        Box::leak(Box::new(refstore_core::name::RefString::try_from(s).unwrap())).as_refstr()
    }

    fn setup() -> (tempfile::TempDir, Registry, Arc<dyn Backend>, Config) {
        let dir = tempdir().unwrap();
        let files: Arc<dyn Backend> =
            Arc::new(FilesBackend::new(dir.path(), "Test User <test@example.com>"));
        files.init_db().unwrap();
        let registry = Registry::new();
        registry.register(Arc::clone(&files));
        (dir, registry, files, Config::default())
    }

    #[test]
    fn s1_create_commits_to_default_backend() {
        let (_dir, registry, files, config) = setup();
        let mut tx = Transaction::new();
        tx.create(rs("refs/heads/main"), oid(1), None).unwrap();
        let warnings = commit(&registry, &files, tx, &config).unwrap();
        assert!(warnings.is_empty());
        let raw = files.read_raw_ref(rs("refs/heads/main")).unwrap().unwrap();
        assert!(matches!(raw.value, RawValue::Direct(o) if o == oid(1)));
    }

    #[test]
    fn single_backend_commit_is_not_split() {
        // `setup()` registers only "files", so this exercises the §4.9 step
        // 2 fast path: one transaction, one `FilesBackend::commit()` call.
        let (_dir, registry, files, config) = setup();
        let mut tx = Transaction::new();
        tx.create(rs("refs/heads/main"), oid(2), None).unwrap();
        tx.update(
            rs("HEAD"),
            Some(Oid::null()),
            None,
            Flags::NODEREF,
            None,
        )
        .unwrap();
        let warnings = commit(&registry, &files, tx, &config).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn s5_split_routes_head_to_files_and_branch_to_configured_backend() {
        let dir = tempdir().unwrap();
        let files: Arc<dyn Backend> =
            Arc::new(FilesBackend::new(dir.path(), "Test User <test@example.com>"));
        files.init_db().unwrap();
        let kv: Arc<dyn Backend> = Arc::new(
            refstore_kv::KvBackend::open(dir.path().join("refs.redb"), "Test User <test@example.com>")
                .unwrap(),
        );
        kv.init_db().unwrap();

        let registry = Registry::new();
        registry.register(Arc::clone(&files));
        registry.register(Arc::clone(&kv));
        let config = Config {
            refstorage: Some("kv".to_owned()),
            ..Config::default()
        };

        let mut tx = Transaction::new();
        tx.create(rs("refs/heads/main"), oid(2), None).unwrap();
        tx.update(rs("HEAD"), Some(Oid::null()), None, Flags::NODEREF, None)
            .unwrap();
        let warnings = commit(&registry, &files, tx, &config).unwrap();
        assert!(warnings.is_empty());

        let branch = kv.read_raw_ref(rs("refs/heads/main")).unwrap().unwrap();
        assert!(matches!(branch.value, RawValue::Direct(o) if o == oid(2)));
        let head = files.read_raw_ref(rs("HEAD")).unwrap().unwrap();
        assert!(matches!(head.value, RawValue::Direct(o) if o.is_null()));
    }

    #[test]
    fn deref_head_symref_writes_through_to_leaf() {
        let (_dir, registry, files, config) = setup();
        files
            .create_symref(rs("HEAD"), rs("refs/heads/main"), None)
            .unwrap();

        let mut tx = Transaction::new();
        tx.update(rs("HEAD"), Some(oid(3)), None, Flags::empty(), None)
            .unwrap();
        commit(&registry, &files, tx, &config).unwrap();

        let raw = files.read_raw_ref(rs("refs/heads/main")).unwrap().unwrap();
        assert!(matches!(raw.value, RawValue::Direct(o) if o == oid(3)));
    }
}
