// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! [`FilesBackend`]: the loose+packed filesystem engine (C6).

use std::{
    fs,
    path::{Path, PathBuf},
};

use refstore_core::{
    backend::{
        Backend, ExpireOptions, ExpirePredicate, ForEachReflogFn, ForEachRefFn, RawRef, RawValue,
    },
    error::{Error, Result},
    name::RefStr,
    oid::Oid,
    transaction::{Flags, ResolveFlags, Transaction},
};

use crate::{
    lock::{self, LockTimeout},
    loose, packed,
    reflog as reflog_file,
};

/// The filesystem reference store: `refs/...` loose files plus a single
/// `packed-refs` catalog, rooted at a repository's git directory.
pub struct FilesBackend {
    root: PathBuf,
    /// `Name <email>` written into reflog entries this backend appends.
    identity: String,
}

impl FilesBackend {
    pub fn new(root: impl Into<PathBuf>, identity: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            identity: identity.into(),
        }
    }

    fn loose_path(&self, name: &RefStr) -> PathBuf {
        self.root.join(name.as_str())
    }

    fn reflog_path(&self, name: &RefStr) -> PathBuf {
        self.root.join("logs").join(name.as_str())
    }

    fn packed_refs_path(&self) -> PathBuf {
        self.root.join("packed-refs")
    }

    fn load_packed(&self) -> Result<packed::Packed> {
        match fs::read_to_string(self.packed_refs_path()) {
            Ok(s) => packed::Packed::parse(&s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(packed::Packed::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn now() -> (i64, i32) {
        let now = time::OffsetDateTime::now_utc();
        (now.unix_timestamp(), now.offset().as_minutes() as i32)
    }

    /// §4.6 step 6: refs that get a reflog without being asked.
    fn auto_creates_reflog(name: &RefStr) -> bool {
        let s = name.as_str();
        s == "HEAD"
            || s.starts_with("refs/heads/")
            || s.starts_with("refs/remotes/")
            || s.starts_with("refs/notes/")
    }

    fn walk_loose(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.ends_with(".lock") {
                continue;
            }
            let full = if prefix.is_empty() {
                file_name.to_string()
            } else {
                format!("{prefix}/{file_name}")
            };
            if entry.file_type()?.is_dir() {
                self.walk_loose(&entry.path(), &full, out)?;
            } else {
                out.push(full);
            }
        }
        Ok(())
    }

    fn check_loose_conflicts(&self, name: &RefStr, skip: &[&RefStr]) -> Result<()> {
        if self.loose_path(name).is_dir() {
            return Err(Error::name_conflict(name.as_str()));
        }
        let mut cur = name.as_str();
        while let Some(idx) = cur.rfind('/') {
            cur = &cur[..idx];
            if skip.iter().any(|s| s.as_str() == cur) {
                continue;
            }
            if self.root.join(cur).is_file() {
                return Err(Error::name_conflict(name.as_str()));
            }
        }
        Ok(())
    }

    fn check_packed_conflicts(
        &self,
        name: &RefStr,
        packed: &packed::Packed,
        skip: &[&RefStr],
    ) -> Result<()> {
        let name_s = name.as_str();
        for e in packed.entries() {
            if e.refname == name_s || skip.iter().any(|s| s.as_str() == e.refname) {
                continue;
            }
            if e.refname.starts_with(&format!("{name_s}/")) || name_s.starts_with(&format!("{}/", e.refname)) {
                return Err(Error::name_conflict(name_s));
            }
        }
        Ok(())
    }
}

impl Backend for FilesBackend {
    fn name(&self) -> &'static str {
        "files"
    }

    fn init_db(&self) -> Result<()> {
        fs::create_dir_all(self.root.join("refs/heads"))?;
        fs::create_dir_all(self.root.join("refs/tags"))?;
        fs::create_dir_all(self.root.join("logs"))?;
        Ok(())
    }

    fn commit(&self, tx: &mut Transaction, affected: &[&RefStr]) -> Result<()> {
        for name in affected.iter().copied() {
            let update = tx
                .updates()
                .iter()
                .find(|u| u.refname.as_refstr() == name)
                .ok_or_else(|| Error::generic(format!("no update staged for {name:?}")))?;

            let path = self.loose_path(name);
            let _lock = lock::acquire_to_hold(&path, LockTimeout::Immediate)?;

            let current = self.read_raw_ref(name)?;
            let current_oid = current.as_ref().and_then(|r| match &r.value {
                RawValue::Direct(o) => Some(*o),
                RawValue::Symbolic(_) => None,
            });

            update.check_old(current_oid)?;

            if !update.is_deletion() {
                self.check_loose_conflicts(name, affected)?;
                self.check_packed_conflicts(name, &self.load_packed()?, affected)?;
            }

            if update.is_verify_only() {
                continue;
            }
            let new = update.new.expect("non-verify update carries a new value");

            if !update.flags.contains(Flags::LOG_ONLY) {
                if update.is_deletion() {
                    match fs::remove_file(&path) {
                        Ok(()) => {},
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                        Err(e) => return Err(e.into()),
                    }
                    let mut packed = self.load_packed()?;
                    if packed.remove(name.as_str()) {
                        lock::write_and_commit(
                            &self.packed_refs_path(),
                            packed.render().as_bytes(),
                            LockTimeout::Immediate,
                        )?;
                    }
                } else {
                    let content = loose::render(&loose::Content::Direct(new));
                    lock::write_and_commit(&path, content.as_bytes(), LockTimeout::Immediate)?;
                }
            }

            let should_log = update.flags.contains(Flags::LOG_ONLY)
                || Self::auto_creates_reflog(name)
                || reflog_file::exists(&self.reflog_path(name));
            if should_log {
                let (t, tz) = Self::now();
                reflog_file::append(
                    &self.reflog_path(name),
                    current_oid.unwrap_or_default(),
                    new,
                    &self.identity,
                    t,
                    tz,
                    update.message.as_deref(),
                )?;
            }
        }
        Ok(())
    }

    fn read_raw_ref(&self, name: &RefStr) -> Result<Option<RawRef>> {
        match fs::read(self.loose_path(name)) {
            Ok(raw) => {
                let rawref = match loose::parse(name.as_str(), &raw) {
                    Ok(loose::Content::Direct(oid)) => {
                        let mut flags = ResolveFlags::empty();
                        if oid.is_null() {
                            flags |= ResolveFlags::ISBROKEN;
                        }
                        RawRef {
                            value: RawValue::Direct(oid),
                            flags,
                        }
                    },
                    Ok(loose::Content::Symbolic(target)) => RawRef {
                        value: RawValue::Symbolic(target),
                        flags: ResolveFlags::ISSYMREF,
                    },
                    Err(e) => {
                        tracing::warn!(refname = %name, %e, "ignoring broken ref");
                        RawRef {
                            value: RawValue::Direct(Oid::null()),
                            flags: ResolveFlags::ISBROKEN,
                        }
                    },
                };
                return Ok(Some(rawref));
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }

        let packed = self.load_packed()?;
        Ok(packed.find(name.as_str()).map(|entry| RawRef {
            value: RawValue::Direct(entry.oid),
            flags: ResolveFlags::empty(),
        }))
    }

    fn for_each_ref(
        &self,
        prefix: &str,
        trim: usize,
        flags: ResolveFlags,
        f: &mut ForEachRefFn<'_>,
    ) -> Result<i32> {
        let start_dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(prefix)
        };
        let mut names = Vec::new();
        self.walk_loose(&start_dir, prefix, &mut names)?;

        let packed = self.load_packed()?;
        for e in packed.entries() {
            if e.refname.starts_with(prefix) && !names.contains(&e.refname) {
                names.push(e.refname.clone());
            }
        }
        names.sort();
        names.dedup();

        for name in names {
            let refname = match RefStr::try_from_str(&name) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let raw = match self.read_raw_ref(refname)? {
                Some(r) => r,
                None => continue,
            };
            if raw.flags.contains(ResolveFlags::ISBROKEN) && !flags.contains(ResolveFlags::INCLUDE_BROKEN) {
                continue;
            }
            let oid = match raw.value {
                RawValue::Direct(o) => Some(o),
                RawValue::Symbolic(_) => None,
            };
            let trimmed = &name[trim.min(name.len())..];
            let r = f(RefStr::from_str_unchecked(trimmed), oid, raw.flags);
            if r != 0 {
                return Ok(r);
            }
        }
        Ok(0)
    }

    fn verify_refname_available(&self, name: &RefStr, skip: &[&RefStr]) -> Result<()> {
        self.check_loose_conflicts(name, skip)?;
        self.check_packed_conflicts(name, &self.load_packed()?, skip)
    }

    fn create_symref(&self, name: &RefStr, target: &RefStr, message: Option<&str>) -> Result<()> {
        self.verify_refname_available(name, &[])?;
        let content = loose::render(&loose::Content::Symbolic(target.as_str().to_owned()));
        lock::write_and_commit(&self.loose_path(name), content.as_bytes(), LockTimeout::Immediate)?;

        if Self::auto_creates_reflog(name) || reflog_file::exists(&self.reflog_path(name)) {
            let (t, tz) = Self::now();
            reflog_file::append(
                &self.reflog_path(name),
                Oid::null(),
                Oid::null(),
                &self.identity,
                t,
                tz,
                message,
            )?;
        }
        Ok(())
    }

    fn rename_ref(&self, old: &RefStr, new: &RefStr, message: Option<&str>) -> Result<()> {
        let (first, second) = if old.as_str() < new.as_str() {
            (old, new)
        } else {
            (new, old)
        };
        let _lock_first = lock::acquire_to_hold(&self.loose_path(first), LockTimeout::Immediate)?;
        let _lock_second = lock::acquire_to_hold(&self.loose_path(second), LockTimeout::Immediate)?;

        self.verify_refname_available(new, &[old])?;

        let raw = self
            .read_raw_ref(old)?
            .ok_or_else(|| Error::NotFound(old.to_string()))?;
        let oid = match raw.value {
            RawValue::Direct(o) => o,
            RawValue::Symbolic(_) => {
                return Err(Error::generic("rename_ref does not support symbolic refs"))
            },
        };

        let content = loose::render(&loose::Content::Direct(oid));
        lock::write_and_commit(&self.loose_path(new), content.as_bytes(), LockTimeout::Immediate)?;

        let old_reflog = self.reflog_path(old);
        let new_reflog = self.reflog_path(new);
        if reflog_file::exists(&old_reflog) {
            if let Some(parent) = new_reflog.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&old_reflog, &new_reflog)?;
            reflog_file::delete(&old_reflog)?;
        }
        let (t, tz) = Self::now();
        reflog_file::append(
            &new_reflog,
            oid,
            oid,
            &self.identity,
            t,
            tz,
            message.or(Some("rename")),
        )?;

        fs::remove_file(self.loose_path(old))?;

        let mut packed = self.load_packed()?;
        if packed.remove(old.as_str()) {
            lock::write_and_commit(
                &self.packed_refs_path(),
                packed.render().as_bytes(),
                LockTimeout::Immediate,
            )?;
        }
        Ok(())
    }

    fn peel_ref(&self, name: &RefStr) -> Result<Option<Oid>> {
        let packed = self.load_packed()?;
        Ok(packed.find(name.as_str()).and_then(|e| e.peeled))
    }

    fn delete_refs(&self, names: &[&RefStr], message: Option<&str>) -> Result<()> {
        let mut sorted: Vec<&RefStr> = names.to_vec();
        sorted.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        let mut packed = self.load_packed()?;
        let mut packed_dirty = false;

        for name in &sorted {
            lock::delete_under_lock(&self.loose_path(name), LockTimeout::Immediate, || Ok(()))?;
            if packed.remove(name.as_str()) {
                packed_dirty = true;
            }
            if reflog_file::exists(&self.reflog_path(name)) {
                let (t, tz) = Self::now();
                reflog_file::append(
                    &self.reflog_path(name),
                    Oid::null(),
                    Oid::null(),
                    &self.identity,
                    t,
                    tz,
                    message,
                )?;
            }
        }

        if packed_dirty {
            lock::write_and_commit(
                &self.packed_refs_path(),
                packed.render().as_bytes(),
                LockTimeout::Immediate,
            )?;
        }
        Ok(())
    }

    fn reflog_exists(&self, name: &RefStr) -> Result<bool> {
        Ok(reflog_file::exists(&self.reflog_path(name)))
    }

    fn create_reflog(&self, name: &RefStr) -> Result<()> {
        reflog_file::create(&self.reflog_path(name))
    }

    fn delete_reflog(&self, name: &RefStr) -> Result<()> {
        reflog_file::delete(&self.reflog_path(name))
    }

    fn for_each_reflog_ent(&self, name: &RefStr, f: &mut ForEachReflogFn<'_>) -> Result<i32> {
        reflog_file::for_each(&self.reflog_path(name), f)
    }

    fn for_each_reflog_ent_reverse(&self, name: &RefStr, f: &mut ForEachReflogFn<'_>) -> Result<i32> {
        reflog_file::for_each_reverse(&self.reflog_path(name), f)
    }

    fn reflog_expire(
        &self,
        name: &RefStr,
        opts: ExpireOptions,
        keep: &mut ExpirePredicate<'_>,
    ) -> Result<()> {
        let updated = reflog_file::expire(&self.reflog_path(name), opts, keep)?;
        if let Some(new_oid) = updated {
            if let Some(raw) = self.read_raw_ref(name)? {
                if matches!(raw.value, RawValue::Direct(_)) {
                    let content = loose::render(&loose::Content::Direct(new_oid));
                    lock::write_and_commit(&self.loose_path(name), content.as_bytes(), LockTimeout::Immediate)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use refstore_core::name::RefString;
    use tempfile::tempdir;

    use super::*;

    fn oid(b: u8) -> Oid {
        Oid::from_bytes(&[b; 20]).unwrap()
    }

    fn rs(s: &str) -> RefString {
        RefString::try_from(s).unwrap()
    }

    fn backend(dir: &std::path::Path) -> FilesBackend {
        let b = FilesBackend::new(dir, "Test User <test@example.com>");
        b.init_db().unwrap();
        b
    }

    fn commit_tx(backend: &FilesBackend, tx: &mut Transaction) -> Result<()> {
        let affected: Vec<RefString> =
            tx.check_unique()?.into_iter().map(ToOwned::to_owned).collect();
        let affected_refs: Vec<&RefStr> = affected.iter().map(|r| r.as_refstr()).collect();
        backend.commit(tx, &affected_refs)
    }

    #[test]
    fn s1_create_then_read() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());

        let mut tx = Transaction::new();
        tx.create(rs("refs/heads/main").as_refstr(), oid(0x11), None).unwrap();
        commit_tx(&backend, &mut tx).unwrap();

        let raw = backend.read_raw_ref(rs("refs/heads/main").as_refstr()).unwrap().unwrap();
        assert!(matches!(raw.value, RawValue::Direct(o) if o == oid(0x11)));
    }

    #[test]
    fn s3_cas_failure_leaves_ref_unchanged() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());

        let mut tx = Transaction::new();
        tx.create(rs("refs/heads/r").as_refstr(), oid(0xaa), None).unwrap();
        commit_tx(&backend, &mut tx).unwrap();

        let mut tx2 = Transaction::new();
        tx2.update(
            rs("refs/heads/r").as_refstr(),
            Some(oid(0xbb)),
            Some(oid(0xcc)),
            Flags::empty(),
            None,
        )
        .unwrap();
        let err = commit_tx(&backend, &mut tx2).unwrap_err();
        assert!(matches!(err, Error::LockError(_)));

        let raw = backend.read_raw_ref(rs("refs/heads/r").as_refstr()).unwrap().unwrap();
        assert!(matches!(raw.value, RawValue::Direct(o) if o == oid(0xaa)));
    }

    #[test]
    fn s4_directory_conflict() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());

        let mut tx = Transaction::new();
        tx.create(rs("refs/foo").as_refstr(), oid(1), None).unwrap();
        commit_tx(&backend, &mut tx).unwrap();

        let mut tx2 = Transaction::new();
        tx2.create(rs("refs/foo/bar").as_refstr(), oid(2), None).unwrap();
        let err = commit_tx(&backend, &mut tx2).unwrap_err();
        assert!(matches!(err, Error::NameConflict { .. }));
    }

    #[test]
    fn loose_shadows_packed() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());

        let mut packed = packed::Packed::default();
        packed.upsert("refs/heads/main", oid(1), None);
        fs::write(backend.packed_refs_path(), packed.render()).unwrap();

        let mut tx = Transaction::new();
        tx.create(rs("refs/heads/main").as_refstr(), oid(2), None).unwrap();
        commit_tx(&backend, &mut tx).unwrap();

        let raw = backend.read_raw_ref(rs("refs/heads/main").as_refstr()).unwrap().unwrap();
        assert!(matches!(raw.value, RawValue::Direct(o) if o == oid(2)));
    }

    #[test]
    fn delete_removes_loose_and_packed() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());

        let mut tx = Transaction::new();
        tx.create(rs("refs/heads/x").as_refstr(), oid(5), None).unwrap();
        commit_tx(&backend, &mut tx).unwrap();

        backend
            .delete_refs(&[rs("refs/heads/x").as_refstr()], Some("bye"))
            .unwrap();

        assert!(backend.read_raw_ref(rs("refs/heads/x").as_refstr()).unwrap().is_none());
    }
}
