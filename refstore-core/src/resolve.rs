// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! The backend-agnostic symref resolver (C3, §4.3).
//!
//! The depth/cycle-bounded hop loop is adapted from
//! `link-git::refs::db::Snapshot::follow`, generalized from a single
//! `packed-refs`-backed store to any [`Backend`] implementation, and from
//! "peeled vs. symbolic" to the full flag set of §3/§4.3.

use crate::{
    backend::{Backend, RawValue},
    error::{Error, Result},
    name::{RefStr, RefString},
    oid::Oid,
    transaction::ResolveFlags,
};

/// Maximum number of symbolic hops to follow before failing with
/// `TOO_DEEP` (§3, §4.3, §8 invariant 9).
pub const MAX_DEPTH: usize = 5;

#[derive(Clone, Debug)]
pub struct Resolved {
    pub name: RefString,
    pub oid: Option<Oid>,
    pub flags: ResolveFlags,
}

/// Follow `name` through up to [`MAX_DEPTH`] `ref:` hops.
///
/// `flags` may request:
/// - [`ResolveFlags::READING`]: a missing leaf is a hard failure, not "zero
///   OID".
/// - [`ResolveFlags::NO_RECURSE`]: stop after the first hop, returning the
///   symbolic target with a zeroed OID.
/// - [`ResolveFlags::ALLOW_BAD_NAME`]: a syntactically invalid starting name
///   may still resolve if it is "safe" per §3.
pub fn resolve(backend: &dyn Backend, name: &RefStr, flags: ResolveFlags) -> Result<Resolved> {
    let mut current = name.to_ref_string();
    let mut acc_flags = ResolveFlags::empty();
    let mut seen: Vec<RefString> = vec![current.clone()];

    for hop in 0..=MAX_DEPTH {
        let raw = backend.read_raw_ref(current.as_refstr())?;
        let raw = match raw {
            Some(r) => r,
            None => {
                if flags.contains(ResolveFlags::READING) {
                    return Err(Error::NotFound(current.to_string()));
                }
                return Ok(Resolved {
                    name: current,
                    oid: None,
                    flags: acc_flags,
                });
            },
        };

        match raw.value {
            RawValue::Direct(oid) => {
                acc_flags.remove(ResolveFlags::ISSYMREF);
                acc_flags |= raw.flags & ResolveFlags::ISBROKEN;
                if oid.is_null() {
                    acc_flags |= ResolveFlags::ISBROKEN;
                }
                return Ok(Resolved {
                    name: current,
                    oid: Some(oid),
                    flags: acc_flags,
                });
            },
            RawValue::Symbolic(target) => {
                acc_flags |= ResolveFlags::ISSYMREF;

                let target = match RefStr::try_from_str(&target) {
                    Ok(t) => t.to_ref_string(),
                    Err(_) => {
                        acc_flags |= ResolveFlags::ISBROKEN | ResolveFlags::BAD_NAME;
                        if flags.contains(ResolveFlags::READING) {
                            return Err(Error::broken(
                                current.to_string(),
                                format!("invalid symref target {target:?}"),
                            ));
                        }
                        return Ok(Resolved {
                            name: current,
                            oid: Some(Oid::null()),
                            flags: acc_flags,
                        });
                    },
                };

                if flags.contains(ResolveFlags::NO_RECURSE) {
                    return Ok(Resolved {
                        name: target,
                        oid: Some(Oid::null()),
                        flags: acc_flags,
                    });
                }

                if seen.contains(&target) {
                    return Err(Error::TooDeep(name.to_string()));
                }
                if hop == MAX_DEPTH {
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
    use std::{collections::BTreeMap, sync::Mutex};

    use super::*;
    use crate::{
        backend::{ExpireOptions, ExpirePredicate, ForEachReflogFn, ForEachRefFn, RawRef},
        transaction::Transaction,
    };

    #[derive(Default)]
    struct FakeBackend {
        refs: Mutex<BTreeMap<String, RawValue>>,
    }

    impl FakeBackend {
        fn set_direct(&self, name: &str, oid: Oid) {
            self.refs
                .lock()
                .unwrap()
                .insert(name.to_owned(), RawValue::Direct(oid));
        }

        fn set_symbolic(&self, name: &str, target: &str) {
            self.refs
                .lock()
                .unwrap()
                .insert(name.to_owned(), RawValue::Symbolic(target.to_owned()));
        }
    }

    impl Backend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn init_db(&self) -> Result<()> {
            Ok(())
        }

        fn commit(&self, _tx: &mut Transaction, _affected: &[&RefStr]) -> Result<()> {
            unimplemented!()
        }

        fn read_raw_ref(&self, name: &RefStr) -> Result<Option<RawRef>> {
            Ok(self.refs.lock().unwrap().get(name.as_str()).cloned().map(|value| {
                RawRef {
                    value,
                    flags: ResolveFlags::empty(),
                }
            }))
        }

        fn for_each_ref(
            &self,
            _prefix: &str,
            _trim: usize,
            _flags: ResolveFlags,
            _f: &mut ForEachRefFn<'_>,
        ) -> Result<i32> {
            unimplemented!()
        }

        fn verify_refname_available(&self, _name: &RefStr, _skip: &[&RefStr]) -> Result<()> {
            unimplemented!()
        }

        fn create_symref(
            &self,
            _name: &RefStr,
            _target: &RefStr,
            _message: Option<&str>,
        ) -> Result<()> {
            unimplemented!()
        }

        fn rename_ref(&self, _old: &RefStr, _new: &RefStr, _message: Option<&str>) -> Result<()> {
            unimplemented!()
        }

        fn peel_ref(&self, _name: &RefStr) -> Result<Option<Oid>> {
            unimplemented!()
        }

        fn delete_refs(&self, _names: &[&RefStr], _message: Option<&str>) -> Result<()> {
            unimplemented!()
        }

        fn reflog_exists(&self, _name: &RefStr) -> Result<bool> {
            unimplemented!()
        }

        fn create_reflog(&self, _name: &RefStr) -> Result<()> {
            unimplemented!()
        }

        fn delete_reflog(&self, _name: &RefStr) -> Result<()> {
            unimplemented!()
        }

        fn for_each_reflog_ent(&self, _name: &RefStr, _f: &mut ForEachReflogFn<'_>) -> Result<i32> {
            unimplemented!()
        }

        fn for_each_reflog_ent_reverse(
            &self,
            _name: &RefStr,
            _f: &mut ForEachReflogFn<'_>,
        ) -> Result<i32> {
            unimplemented!()
        }

        fn reflog_expire(
            &self,
            _name: &RefStr,
            _opts: ExpireOptions,
            _keep: &mut ExpirePredicate<'_>,
        ) -> Result<()> {
            unimplemented!()
        }
    }

    fn rs(s: &str) -> RefString {
        RefString::try_from(s).unwrap()
    }

    fn oid(b: u8) -> Oid {
        Oid::from_bytes(&[b; 20]).unwrap()
    }

    #[test]
    fn s1_create_then_read() {
        let backend = FakeBackend::default();
        backend.set_direct("refs/heads/main", oid(0x11));
        let r = resolve(
            &backend,
            rs("refs/heads/main").as_refstr(),
            ResolveFlags::READING,
        )
        .unwrap();
        assert_eq!(r.name.as_refstr(), rs("refs/heads/main").as_refstr());
        assert_eq!(r.oid, Some(oid(0x11)));
        assert!(r.flags.is_empty());
    }

    #[test]
    fn s2_symref_follow() {
        let backend = FakeBackend::default();
        backend.set_direct("refs/heads/main", oid(0x22));
        backend.set_symbolic("HEAD", "refs/heads/main");

        let r = resolve(&backend, rs("HEAD").as_refstr(), ResolveFlags::empty()).unwrap();
        assert_eq!(r.name.as_refstr(), rs("refs/heads/main").as_refstr());
        assert_eq!(r.oid, Some(oid(0x22)));
        assert!(r.flags.is_empty());

        let r = resolve(&backend, rs("HEAD").as_refstr(), ResolveFlags::NO_RECURSE).unwrap();
        assert_eq!(r.name.as_refstr(), rs("refs/heads/main").as_refstr());
        assert_eq!(r.oid, Some(Oid::null()));
        assert!(r.flags.contains(ResolveFlags::ISSYMREF));
    }

    #[test]
    fn exactly_five_hops_succeeds() {
        let backend = FakeBackend::default();
        for i in 0..5 {
            backend.set_symbolic(&format!("refs/h{i}"), &format!("refs/h{}", i + 1));
        }
        backend.set_direct("refs/h5", oid(7));

        let r = resolve(&backend, rs("refs/h0").as_refstr(), ResolveFlags::empty()).unwrap();
        assert_eq!(r.oid, Some(oid(7)));
    }

    #[test]
    fn six_hops_is_too_deep() {
        let backend = FakeBackend::default();
        for i in 0..6 {
            backend.set_symbolic(&format!("refs/h{i}"), &format!("refs/h{}", i + 1));
        }
        backend.set_direct("refs/h6", oid(7));

        let err = resolve(&backend, rs("refs/h0").as_refstr(), ResolveFlags::empty()).unwrap_err();
        assert!(matches!(err, Error::TooDeep(_)));
    }

    #[test]
    fn depth_exceeded_is_too_deep() {
        let backend = FakeBackend::default();
        for i in 0..7 {
            backend.set_symbolic(&format!("refs/r{i}"), &format!("refs/r{}", i + 1));
        }
        backend.set_direct("refs/r7", oid(1));

        let err = resolve(&backend, rs("refs/r0").as_refstr(), ResolveFlags::empty()).unwrap_err();
        assert!(matches!(err, Error::TooDeep(_)));
    }

    #[test]
    fn cycle_is_too_deep() {
        let backend = FakeBackend::default();
        backend.set_symbolic("refs/a", "refs/b");
        backend.set_symbolic("refs/b", "refs/a");

        let err = resolve(&backend, rs("refs/a").as_refstr(), ResolveFlags::empty()).unwrap_err();
        assert!(matches!(err, Error::TooDeep(_)));
    }

    #[test]
    fn reading_missing_leaf_is_hard_failure() {
        let backend = FakeBackend::default();
        let err = resolve(
            &backend,
            rs("refs/heads/none").as_refstr(),
            ResolveFlags::READING,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
