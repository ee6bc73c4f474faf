// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! A pluggable, transactional git reference store.
//!
//! [`refstore_core`] defines the name/OID/reflog primitives, the
//! [`refstore_core::Backend`] contract, and the backend-agnostic symref
//! resolver. [`refstore_files`] and [`refstore_kv`] are the two storage
//! engines shipped here. This crate is the part an embedder actually talks
//! to: a [`Registry`] of the engines compiled in, a commit pipeline that
//! knows how to split one transaction across them, and the iteration/dwim
//! facade built on top.

pub mod config;
pub mod coordinator;
pub mod iter;
pub mod registry;

pub use config::{Config, HideRefs};
pub use iter::Dwim;
pub use registry::{Registry, DEFAULT_BACKEND};

use std::sync::Arc;

use refstore_core::{
    backend::{Backend, ForEachRefFn},
    error::{Result, Warning},
    name::{RefStr, RefString},
    resolve::Resolved,
    transaction::{ResolveFlags, Transaction},
};

/// One repository's view onto the reference store: which backends are
/// available, which one services `HEAD`/pseudorefs (always `files`), and
/// the `Config` governing backend selection and hidden refs.
pub struct RefStore {
    registry: Registry,
    files: Arc<dyn Backend>,
    config: Config,
}

impl RefStore {
    pub fn new(registry: Registry, files: Arc<dyn Backend>, config: Config) -> Self {
        Self {
            registry,
            files,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn normal_backend(&self) -> Result<Arc<dyn Backend>> {
        self.registry.resolve(self.config.refstorage.as_deref())
    }

    /// Commit `tx` per §4.9, splitting it across the configured backend and
    /// the files backend as each update's [`refstore_core::Kind`] demands.
    pub fn commit(&self, tx: Transaction) -> Result<Vec<Warning>> {
        coordinator::commit(&self.registry, &self.files, tx, &self.config)
    }

    /// The §4.9 "initial ref transaction commit" variant, for laying out a
    /// freshly created repository.
    pub fn initial_commit(&self, tx: Transaction) -> Result<Vec<Warning>> {
        coordinator::initial_commit(&self.registry, &self.files, tx, &self.config)
    }

    /// Resolve `name` through the backend that actually services its kind.
    pub fn resolve(&self, name: &RefStr, flags: ResolveFlags) -> Result<Resolved> {
        let kind = refstore_core::classify(name);
        let backend = if kind.always_files_backend() {
            Arc::clone(&self.files)
        } else {
            self.normal_backend()?
        };
        refstore_core::resolve::resolve(backend.as_ref(), name, flags)
    }

    pub fn for_each_ref(
        &self,
        prefix: &str,
        trim: usize,
        flags: ResolveFlags,
        include_hidden: bool,
        f: &mut ForEachRefFn<'_>,
    ) -> Result<i32> {
        let backend = self.normal_backend()?;
        iter::for_each_ref(backend.as_ref(), &self.config, prefix, trim, flags, include_hidden, f)
    }

    pub fn dwim_ref(&self, short: &str) -> Result<Dwim> {
        let backend = self.normal_backend()?;
        iter::dwim_ref(backend.as_ref(), short)
    }

    pub fn shorten_unambiguous_ref(&self, name: &RefStr, strict: bool) -> Result<RefString> {
        let backend = self.normal_backend()?;
        iter::shorten_unambiguous_ref(backend.as_ref(), name, strict)
    }

    /// §1.2 expansion: resolve a ref inside `submodule`, after checking its
    /// configured backend agrees with this repository's.
    pub fn resolve_gitlink_ref(
        &self,
        submodule: &Arc<dyn Backend>,
        submodule_refstorage: Option<&str>,
        name: &RefStr,
        flags: ResolveFlags,
    ) -> Result<Resolved> {
        self.registry
            .validate_submodule_backend(self.config.refstorage.as_deref(), submodule_refstorage)?;
        iter::resolve_gitlink_ref(submodule, name, flags)
    }
}

#[cfg(test)]
mod tests {
    use refstore_core::{
        backend::RawValue,
        oid::Oid,
        transaction::Flags,
    };
    use refstore_files::FilesBackend;
    use tempfile::tempdir;

    use super::*;

    fn rs(s: &str) -> RefString {
        RefString::try_from(s).unwrap()
    }

    fn oid(b: u8) -> Oid {
        Oid::from_bytes(&[b; 20]).unwrap()
    }

    fn store() -> (tempfile::TempDir, RefStore) {
        let dir = tempdir().unwrap();
        let files: Arc<dyn Backend> =
            Arc::new(FilesBackend::new(dir.path(), "Test User <test@example.com>"));
        files.init_db().unwrap();
        let registry = Registry::new();
        registry.register(Arc::clone(&files));
        let store = RefStore::new(registry, files, Config::default());
        (dir, store)
    }

    #[test]
    fn commit_then_resolve_round_trips() {
        let (_dir, store) = store();
        let mut tx = Transaction::new();
        tx.create(rs("refs/heads/main").as_refstr(), oid(1), None).unwrap();
        let warnings = store.commit(tx).unwrap();
        assert!(warnings.is_empty());

        let resolved = store
            .resolve(rs("refs/heads/main").as_refstr(), ResolveFlags::READING)
            .unwrap();
        assert_eq!(resolved.oid, Some(oid(1)));
    }

    #[test]
    fn head_always_routes_through_files_backend() {
        let (_dir, store) = store();
        let mut tx = Transaction::new();
        tx.update(rs("HEAD").as_refstr(), Some(Oid::null()), None, Flags::NODEREF, None)
            .unwrap();
        store.commit(tx).unwrap();

        let raw = store.files.read_raw_ref(rs("HEAD").as_refstr()).unwrap();
        assert!(matches!(
            raw,
            Some(refstore_core::backend::RawRef { value: RawValue::Direct(o), .. }) if o.is_null()
        ));
    }
}
