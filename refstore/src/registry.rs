// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! The backend registry (C8, §4.8): a name-keyed table of the compiled-in
//! storage engines, selected per repository by `extensions.refstorage`.
//!
//! Grounded on `link-git::refs::db`'s `Arc<RwLock<Option<Packed>>>` sharing
//! of a single mutable resource across readers; generalized here from one
//! cached value to a small, append-only table of named backends.

use std::sync::Arc;

use parking_lot::RwLock;
use refstore_core::{Backend, Error, Result};

/// Name a freshly initialized repository gets when no `extensions.refstorage`
/// value is present (§4.8 "default backend").
pub const DEFAULT_BACKEND: &str = "files";

/// A name-keyed table of the backends compiled into this process.
///
/// Registration happens once, at startup; lookups are frequent and must not
/// block each other, hence the reader/writer split rather than a plain
/// `Mutex`.
pub struct Registry {
    backends: RwLock<Vec<(&'static str, Arc<dyn Backend>)>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
        }
    }

    /// Register a backend under its own [`Backend::name`]. Re-registering
    /// the same name replaces the previous entry.
    pub fn register(&self, backend: Arc<dyn Backend>) {
        let name = backend.name();
        let mut backends = self.backends.write();
        if let Some(slot) = backends.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = backend;
        } else {
            backends.push((name, backend));
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends
            .read()
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| Arc::clone(b))
    }

    /// Resolve the backend configured for `Kind::Normal` refs: the named
    /// backend if `refstorage` names one, else [`DEFAULT_BACKEND`].
    pub fn resolve(&self, refstorage: Option<&str>) -> Result<Arc<dyn Backend>> {
        let name = refstorage.unwrap_or(DEFAULT_BACKEND);
        self.get(name)
            .ok_or_else(|| Error::generic(format!("no backend registered under {name:?}")))
    }

    /// §1.2 expansion: a submodule's own `extensions.refstorage` must match
    /// the parent repository's, or storage operations crossing the
    /// submodule boundary would silently target two different engines.
    pub fn validate_submodule_backend(
        &self,
        parent: Option<&str>,
        submodule: Option<&str>,
    ) -> Result<()> {
        let parent_name = parent.unwrap_or(DEFAULT_BACKEND);
        let submodule_name = submodule.unwrap_or(DEFAULT_BACKEND);
        if parent_name != submodule_name {
            return Err(Error::generic(format!(
                "submodule refstorage backend {submodule_name:?} does not match \
                 parent backend {parent_name:?}"
            )));
        }
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
