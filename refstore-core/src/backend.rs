// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! The backend contract of §6, expressed as a single object-safe trait so
//! the registry (C8) can hold a heterogeneous `Vec<Arc<dyn Backend>>`
//! (§9 "Polymorphism over backends").

use crate::{
    error::Result,
    name::RefStr,
    oid::Oid,
    reflog,
    transaction::{ResolveFlags, Transaction},
};

/// The value of a single, un-resolved hop: either a direct OID, or the name
/// of another reference to follow.
#[derive(Clone, Debug)]
pub enum RawValue {
    Direct(Oid),
    Symbolic(String),
}

#[derive(Clone, Debug)]
pub struct RawRef {
    pub value: RawValue,
    pub flags: ResolveFlags,
}

/// A callback invoked once per visited ref by [`Backend::for_each_ref`].
/// A non-zero return stops iteration and becomes the iteration's result
/// (§4.10, §7 "Iteration callbacks propagate their own return value").
pub type ForEachRefFn<'a> = dyn FnMut(&RefStr, Option<Oid>, ResolveFlags) -> i32 + 'a;

/// A single reflog entry visitor; same early-stop convention as
/// [`ForEachRefFn`].
pub type ForEachReflogFn<'a> = dyn FnMut(&reflog::Entry) -> i32 + 'a;

/// Predicate supplied to [`Backend::reflog_expire`]: return `true` to keep
/// the entry.
pub type ExpirePredicate<'a> = dyn FnMut(&reflog::Entry) -> bool + 'a;

#[derive(Clone, Copy, Debug, Default)]
pub struct ExpireOptions {
    /// §4.6 "If `UPDATE_REF` is requested ... also update the ref to the
    /// last kept new-value."
    pub update_ref: bool,
}

/// The operations every storage engine must supply (§6 table).
///
/// Implementations are free to choose static or dynamic dispatch elsewhere;
/// this trait is the join point the coordinator and iteration facade are
/// written against, and is what `Arc<dyn Backend>` erases to in the
/// registry.
pub trait Backend: Send + Sync {
    /// Stable identifier used by the registry and `extensions.refstorage`.
    fn name(&self) -> &'static str;

    /// Create empty storage. Idempotent.
    fn init_db(&self) -> Result<()>;

    /// Commit `tx`'s updates, which have already been sorted and
    /// dereferenced by the coordinator. `affected` is the sorted, deduplicated
    /// list of refnames the transaction touches, supplied by the coordinator
    /// per §4.9 step 3/4.
    fn commit(&self, tx: &mut Transaction, affected: &[&RefStr]) -> Result<()>;

    /// Commit without the per-ref pre-existence checks ordinary `commit`
    /// performs; used only by fresh-repository creation (§4.9).
    fn initial_commit(&self, tx: &mut Transaction, affected: &[&RefStr]) -> Result<()> {
        self.commit(tx, affected)
    }

    /// Single-hop read; performs no symref resolution.
    fn read_raw_ref(&self, name: &RefStr) -> Result<Option<RawRef>>;

    /// Ordered iteration starting at `prefix` (empty for "all refs"),
    /// trimming `trim` leading bytes from each yielded name before handing
    /// it to `f`.
    fn for_each_ref(
        &self,
        prefix: &str,
        trim: usize,
        flags: ResolveFlags,
        f: &mut ForEachRefFn<'_>,
    ) -> Result<i32>;

    /// Directory/file conflict check (§4.6 step 3, §4.7 "Name availability").
    fn verify_refname_available(&self, name: &RefStr, skip: &[&RefStr]) -> Result<()>;

    fn create_symref(&self, name: &RefStr, target: &RefStr, message: Option<&str>) -> Result<()>;

    fn rename_ref(&self, old: &RefStr, new: &RefStr, message: Option<&str>) -> Result<()>;

    /// Resolve a ref to the non-symbolic OID it ultimately names, using only
    /// the peeled annotation of a packed catalog where available (§1.2
    /// expansion - "the core does not open the object database").
    fn peel_ref(&self, name: &RefStr) -> Result<Option<Oid>>;

    fn delete_refs(&self, names: &[&RefStr], message: Option<&str>) -> Result<()>;

    fn reflog_exists(&self, name: &RefStr) -> Result<bool>;

    fn create_reflog(&self, name: &RefStr) -> Result<()>;

    fn delete_reflog(&self, name: &RefStr) -> Result<()>;

    fn for_each_reflog_ent(&self, name: &RefStr, f: &mut ForEachReflogFn<'_>) -> Result<i32>;

    fn for_each_reflog_ent_reverse(
        &self,
        name: &RefStr,
        f: &mut ForEachReflogFn<'_>,
    ) -> Result<i32>;

    fn reflog_expire(
        &self,
        name: &RefStr,
        opts: ExpireOptions,
        keep: &mut ExpirePredicate<'_>,
    ) -> Result<()>;
}
