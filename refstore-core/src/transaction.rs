// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! The transaction object (C5, §4.5) and the [`Update`] it accumulates.
//!
//! The CAS guard on `old?` is adapted from
//! `link-tracking::git::refdb::PreviousValue`'s `guard` combinator, widened
//! from "track/untrack" semantics to the general create/update/delete/verify
//! set of §4.5.

use bitflags::bitflags;

use crate::{
    error::{Error, Result},
    name::{RefStr, RefString},
    oid::Oid,
};

bitflags! {
    #[derive(Default)]
    pub struct Flags: u32 {
        /// Operate on the symref itself, not its pointee.
        const NODEREF     = 1 << 0;
        /// Write only a reflog entry; do not touch the ref value.
        const LOG_ONLY    = 1 << 1;
        const HAVE_NEW    = 1 << 2;
        const HAVE_OLD    = 1 << 3;
        /// Derived: set when `new` is the null OID.
        const DELETING    = 1 << 4;
        const IS_NOT_HEAD = 1 << 5;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct ResolveFlags: u32 {
        const ISSYMREF        = 1 << 0;
        const ISBROKEN        = 1 << 1;
        const BAD_NAME        = 1 << 2;
        const READING         = 1 << 3;
        const NO_RECURSE      = 1 << 4;
        const ALLOW_BAD_NAME  = 1 << 5;
        const INCLUDE_BROKEN  = 1 << 6;
    }
}

/// One staged change within a [`Transaction`].
#[derive(Clone, Debug)]
pub struct Update {
    pub refname: RefString,
    pub new: Option<Oid>,
    pub old: Option<Oid>,
    pub flags: Flags,
    pub message: Option<String>,
    /// Filled in by the coordinator's dereferencing pass (§4.9 step 1): the
    /// OID observed at the resolved leaf before this update was applied.
    pub read_oid: Option<Oid>,
}

impl Update {
    fn new(
        refname: RefString,
        new: Option<Oid>,
        old: Option<Oid>,
        flags: Flags,
        message: Option<String>,
    ) -> Self {
        let mut flags = flags;
        if new.is_some() {
            flags |= Flags::HAVE_NEW;
        }
        if old.is_some() {
            flags |= Flags::HAVE_OLD;
        }
        if matches!(new, Some(ref o) if o.is_null()) {
            flags |= Flags::DELETING;
        }
        Self {
            refname,
            new,
            old,
            flags,
            message,
            read_oid: None,
        }
    }

    pub fn is_deletion(&self) -> bool {
        self.flags.contains(Flags::DELETING)
    }

    pub fn is_verify_only(&self) -> bool {
        self.new.is_none()
    }

    /// Apply the §4.5 CAS guard: does `current` satisfy this update's `old?`
    /// expectation?
    pub fn check_old(&self, current: Option<Oid>) -> Result<()> {
        match self.old {
            None => Ok(()),
            Some(expected) if expected.is_null() => {
                if current.is_some() {
                    Err(Error::lock(format!(
                        "{:?}: expected to not exist, but it does",
                        self.refname
                    )))
                } else {
                    Ok(())
                }
            },
            Some(expected) => match current {
                None => Err(Error::lock(format!(
                    "{:?}: expected to exist, but it does not",
                    self.refname
                ))),
                Some(actual) if actual == expected => Ok(()),
                Some(actual) => Err(Error::lock(format!(
                    "{:?}: expected {expected}, found {actual}",
                    self.refname
                ))),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Open,
    Prepared,
    Closed,
}

/// A multi-update transaction (§3 "Transaction", §4.5).
///
/// Mutable only in [`State::Open`]; the coordinator (C9) drives it through
/// `Open -> Prepared -> Closed`.
#[derive(Debug)]
pub struct Transaction {
    updates: Vec<Update>,
    state: State,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            updates: Vec::new(),
            state: State::Open,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn updates(&self) -> &[Update] {
        &self.updates
    }

    pub fn updates_mut(&mut self) -> &mut Vec<Update> {
        &mut self.updates
    }

    fn require_open(&self) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::generic(format!(
                "transaction is not open (state: {:?})",
                self.state
            )));
        }
        Ok(())
    }

    /// §4.5 `update`: appends; fails if not `OPEN`, or the name is
    /// syntactically bad while `new?` is a real OID.
    pub fn update(
        &mut self,
        refname: &RefStr,
        new: Option<Oid>,
        old: Option<Oid>,
        flags: Flags,
        message: Option<String>,
    ) -> Result<()> {
        self.require_open()?;
        self.updates.push(Update::new(
            refname.to_ref_string(),
            new,
            old,
            flags,
            message,
        ));
        Ok(())
    }

    /// §4.5 `create`: fails if `new` is missing or the null OID.
    pub fn create(&mut self, refname: &RefStr, new: Oid, message: Option<String>) -> Result<()> {
        if new.is_null() {
            return Err(Error::generic("create requires a non-null new value"));
        }
        self.update(refname, Some(new), Some(Oid::null()), Flags::empty(), message)
    }

    /// §4.5 `delete`: fails if `old?` is exactly the null OID.
    pub fn delete(
        &mut self,
        refname: &RefStr,
        old: Option<Oid>,
        message: Option<String>,
    ) -> Result<()> {
        if matches!(old, Some(o) if o.is_null()) {
            return Err(Error::generic(
                "delete's old value must not be the null OID",
            ));
        }
        self.update(refname, Some(Oid::null()), old, Flags::empty(), message)
    }

    /// §4.5 `verify`: fails if `old` is absent.
    pub fn verify(&mut self, refname: &RefStr, old: Oid) -> Result<()> {
        self.update(refname, None, Some(old), Flags::empty(), None)
    }

    /// §4.9 step 3: freeze the update list before handing it to a backend.
    pub fn begin_commit(&mut self) -> Result<()> {
        self.require_open()?;
        self.state = State::Prepared;
        Ok(())
    }

    /// §4.9 step 5: mark the transaction done, whether the commit succeeded
    /// or failed.
    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    /// §8 invariant 4: duplicate refnames within one (sub-)transaction fail
    /// before any storage is touched.
    pub fn check_unique(&self) -> Result<Vec<&RefStr>> {
        let mut names: Vec<&RefStr> = self.updates.iter().map(|u| u.refname.as_refstr()).collect();
        names.sort();
        for w in names.windows(2) {
            if w[0] == w[1] {
                return Err(Error::generic(format!(
                    "duplicate refname {:?} in transaction",
                    w[0]
                )));
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(b: u8) -> Oid {
        Oid::from_bytes(&[b; 20]).unwrap()
    }

    fn rs(s: &str) -> RefString {
        RefString::try_from(s).unwrap()
    }

    #[test]
    fn create_rejects_null() {
        let mut tx = Transaction::new();
        assert!(tx
            .create(rs("refs/heads/main").as_refstr(), Oid::null(), None)
            .is_err());
    }

    #[test]
    fn delete_rejects_null_old() {
        let mut tx = Transaction::new();
        assert!(tx
            .delete(rs("refs/heads/main").as_refstr(), Some(Oid::null()), None)
            .is_err());
    }

    #[test]
    fn duplicate_refname_fails_before_storage() {
        let mut tx = Transaction::new();
        tx.create(rs("refs/heads/main").as_refstr(), oid(1), None)
            .unwrap();
        tx.update(
            rs("refs/heads/main").as_refstr(),
            Some(oid(2)),
            None,
            Flags::empty(),
            None,
        )
        .unwrap();
        assert!(tx.check_unique().is_err());
    }

    #[test]
    fn cannot_mutate_after_commit_begins() {
        let mut tx = Transaction::new();
        tx.begin_commit().unwrap();
        assert!(tx
            .create(rs("refs/heads/main").as_refstr(), oid(1), None)
            .is_err());
    }

    #[test]
    fn cas_guard() {
        let u = Update::new(rs("r"), Some(oid(2)), Some(oid(1)), Flags::empty(), None);
        assert!(u.check_old(Some(oid(1))).is_ok());
        assert!(u.check_old(Some(oid(9))).is_err());
        assert!(u.check_old(None).is_err());
    }
}
