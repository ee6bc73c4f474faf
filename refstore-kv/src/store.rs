// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! [`KvBackend`]: the embedded ordered key-value engine (C7, §4.7).

use std::path::Path;

use redb::{ReadableTable, TableDefinition};

use refstore_core::{
    backend::{
        Backend, ExpireOptions, ExpirePredicate, ForEachReflogFn, ForEachRefFn, RawRef, RawValue,
    },
    error::{Error, Result},
    name::{RefStr, RefString},
    oid::Oid,
    reflog::{self, Entry},
    transaction::{Flags, ResolveFlags, Transaction},
};

use crate::{keys, session::Session};

const REFS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("refs");
const REFLOG: TableDefinition<&[u8], &[u8]> = TableDefinition::new("reflog");

/// The embedded key-value reference store: a single ordered table for refs,
/// another for reflog entries, behind one writer at a time (§4.7).
pub struct KvBackend {
    session: Session,
    identity: String,
}

impl KvBackend {
    pub fn open(path: impl AsRef<Path>, identity: impl Into<String>) -> Result<Self> {
        Ok(Self {
            session: Session::open(path)?,
            identity: identity.into(),
        })
    }

    fn now_nanos() -> u64 {
        time::OffsetDateTime::now_utc().unix_timestamp_nanos() as u64
    }

    fn now_seconds_and_tz() -> (i64, i32) {
        let now = time::OffsetDateTime::now_utc();
        (now.unix_timestamp(), now.offset().as_minutes() as i32)
    }

    fn encode_entry(entry: &Entry) -> Vec<u8> {
        let mut line = reflog::encode(
            entry.old,
            entry.new,
            &entry.identity,
            entry.time_seconds,
            entry.tz_minutes,
            entry.message.as_deref(),
        );
        line.pop(); // drop the trailing '\n' the line-oriented codec appends
        line.push('\0');
        line.into_bytes()
    }

    fn decode_entry(bytes: &[u8]) -> Result<Entry> {
        let s = std::str::from_utf8(bytes)
            .map_err(|_| Error::broken("<kv reflog>", "value is not UTF-8"))?;
        let s = s.strip_suffix('\0').unwrap_or(s);
        reflog::decode(s).map_err(|e| Error::broken("<kv reflog>", e.to_string()))
    }

    /// §4.7 "Name availability": any key under `<refname>/` is a conflict,
    /// and so is an exact hit on any ancestor directory of `refname`.
    fn check_conflicts<T: ReadableTable<&'static [u8], &'static [u8]>>(
        &self,
        refs: &T,
        name: &RefStr,
        skip: &[&RefStr],
    ) -> Result<()> {
        let descendant_prefix = format!("{}/", name.as_str()).into_bytes();
        let range = refs
            .range(descendant_prefix.as_slice()..)
            .map_err(|e| Error::generic(e.to_string()))?;
        for item in range {
            let (k, _) = item.map_err(|e| Error::generic(e.to_string()))?;
            let key = k.value();
            if !key.starts_with(descendant_prefix.as_slice()) {
                break;
            }
            let refname = decode_refname(key)?;
            if skip.iter().any(|s| s.as_str() == refname) {
                continue;
            }
            return Err(Error::name_conflict(name.as_str()));
        }

        let mut cur = name.as_str();
        while let Some(idx) = cur.rfind('/') {
            cur = &cur[..idx];
            if skip.iter().any(|s| s.as_str() == cur) {
                continue;
            }
            if refs
                .get(keys::ref_key(cur).as_slice())
                .map_err(|e| Error::generic(e.to_string()))?
                .is_some()
            {
                return Err(Error::name_conflict(name.as_str()));
            }
        }
        Ok(())
    }

    fn auto_creates_reflog(name: &RefStr) -> bool {
        let s = name.as_str();
        s == "HEAD"
            || s.starts_with("refs/heads/")
            || s.starts_with("refs/remotes/")
            || s.starts_with("refs/notes/")
    }
}

fn decode_refname(key: &[u8]) -> Result<&str> {
    let without_nul = key
        .strip_suffix(&[0u8])
        .ok_or_else(|| Error::generic("ref key missing NUL terminator"))?;
    std::str::from_utf8(without_nul).map_err(|_| Error::generic("ref key is not UTF-8"))
}

impl Backend for KvBackend {
    fn name(&self) -> &'static str {
        "kv"
    }

    fn init_db(&self) -> Result<()> {
        let w = self.session.write()?;
        w.tx
            .open_table(REFS)
            .map_err(|e| Error::generic(e.to_string()))?;
        w.tx
            .open_table(REFLOG)
            .map_err(|e| Error::generic(e.to_string()))?;
        w.commit()
    }

    fn commit(&self, tx: &mut Transaction, affected: &[&RefStr]) -> Result<()> {
        let writer = self.session.write()?;
        {
            let mut refs = writer
                .tx
                .open_table(REFS)
                .map_err(|e| Error::generic(e.to_string()))?;
            let mut reflog_tbl = writer
                .tx
                .open_table(REFLOG)
                .map_err(|e| Error::generic(e.to_string()))?;

            for name in affected.iter().copied() {
                let update = tx
                    .updates()
                    .iter()
                    .find(|u| u.refname.as_refstr() == name)
                    .ok_or_else(|| Error::generic(format!("no update staged for {name:?}")))?;

                let key = keys::ref_key(name.as_str());
                let current = refs
                    .get(key.as_slice())
                    .map_err(|e| Error::generic(e.to_string()))?
                    .map(|v| v.value().to_vec());
                let current_oid = match &current {
                    Some(bytes) => match keys::decode_value(bytes)? {
                        RawValue::Direct(o) => Some(o),
                        RawValue::Symbolic(_) => None,
                    },
                    None => None,
                };

                update.check_old(current_oid)?;

                if !update.is_deletion() {
                    self.check_conflicts(&refs, name, affected)?;
                }

                if update.is_verify_only() {
                    continue;
                }
                let new = update.new.expect("non-verify update carries a new value");

                if !update.flags.contains(Flags::LOG_ONLY) {
                    if update.is_deletion() {
                        refs.remove(key.as_slice())
                            .map_err(|e| Error::generic(e.to_string()))?;
                    } else {
                        let value = keys::encode_value(&RawValue::Direct(new));
                        refs.insert(key.as_slice(), value.as_slice())
                            .map_err(|e| Error::generic(e.to_string()))?;
                    }
                }

                let header = keys::reflog_header_key(name.as_str());
                let has_reflog = reflog_tbl
                    .get(header.as_slice())
                    .map_err(|e| Error::generic(e.to_string()))?
                    .is_some();
                let should_log = update.flags.contains(Flags::LOG_ONLY)
                    || Self::auto_creates_reflog(name)
                    || has_reflog;
                if should_log {
                    if !has_reflog {
                        reflog_tbl
                            .insert(header.as_slice(), [].as_slice())
                            .map_err(|e| Error::generic(e.to_string()))?;
                    }
                    let (t, tz) = Self::now_seconds_and_tz();
                    let entry = Entry {
                        old: current_oid.unwrap_or_default(),
                        new,
                        identity: self.identity.clone(),
                        time_seconds: t,
                        tz_minutes: tz,
                        message: update.message.clone(),
                    };
                    let entry_key = keys::reflog_entry_key(name.as_str(), Self::now_nanos());
                    reflog_tbl
                        .insert(entry_key.as_slice(), Self::encode_entry(&entry).as_slice())
                        .map_err(|e| Error::generic(e.to_string()))?;
                }
            }
        }
        writer.commit()
    }

    fn read_raw_ref(&self, name: &RefStr) -> Result<Option<RawRef>> {
        let reader = self.session.read()?;
        let refs = reader
            .open_table(REFS)
            .map_err(|e| Error::generic(e.to_string()))?;
        let key = keys::ref_key(name.as_str());
        let bytes = match refs
            .get(key.as_slice())
            .map_err(|e| Error::generic(e.to_string()))?
        {
            Some(v) => v.value().to_vec(),
            None => return Ok(None),
        };
        let raw = match keys::decode_value(&bytes) {
            Ok(RawValue::Direct(oid)) => {
                let mut flags = ResolveFlags::empty();
                if oid.is_null() {
                    flags |= ResolveFlags::ISBROKEN;
                }
                RawRef {
                    value: RawValue::Direct(oid),
                    flags,
                }
            },
            Ok(RawValue::Symbolic(target)) => RawRef {
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
        Ok(Some(raw))
    }

    fn for_each_ref(
        &self,
        prefix: &str,
        trim: usize,
        flags: ResolveFlags,
        f: &mut ForEachRefFn<'_>,
    ) -> Result<i32> {
        let reader = self.session.read()?;
        let refs = reader
            .open_table(REFS)
            .map_err(|e| Error::generic(e.to_string()))?;
        let prefix_bytes = prefix.as_bytes().to_vec();
        let range = refs
            .range(prefix_bytes.as_slice()..)
            .map_err(|e| Error::generic(e.to_string()))?;

        for item in range {
            let (k, v) = item.map_err(|e| Error::generic(e.to_string()))?;
            let key = k.value();
            if !key.starts_with(prefix_bytes.as_slice()) {
                break;
            }
            let name = decode_refname(key)?;
            let value = keys::decode_value(v.value());
            let (oid, ref_flags) = match value {
                Ok(RawValue::Direct(o)) if o.is_null() => (None, ResolveFlags::ISBROKEN),
                Ok(RawValue::Direct(o)) => (Some(o), ResolveFlags::empty()),
                Ok(RawValue::Symbolic(_)) => (None, ResolveFlags::ISSYMREF),
                Err(_) => (None, ResolveFlags::ISBROKEN),
            };
            if ref_flags.contains(ResolveFlags::ISBROKEN) && !flags.contains(ResolveFlags::INCLUDE_BROKEN) {
                continue;
            }
            let trimmed = &name[trim.min(name.len())..];
            let r = f(RefStr::from_str_unchecked(trimmed), oid, ref_flags);
            if r != 0 {
                return Ok(r);
            }
        }
        Ok(0)
    }

    fn verify_refname_available(&self, name: &RefStr, skip: &[&RefStr]) -> Result<()> {
        let reader = self.session.read()?;
        let refs = reader
            .open_table(REFS)
            .map_err(|e| Error::generic(e.to_string()))?;
        self.check_conflicts(&refs, name, skip)
    }

    fn create_symref(&self, name: &RefStr, target: &RefStr, message: Option<&str>) -> Result<()> {
        let writer = self.session.write()?;
        {
            let mut refs = writer
                .tx
                .open_table(REFS)
                .map_err(|e| Error::generic(e.to_string()))?;
            self.check_conflicts(&refs, name, &[])?;
            let value = keys::encode_value(&RawValue::Symbolic(target.as_str().to_owned()));
            refs.insert(keys::ref_key(name.as_str()).as_slice(), value.as_slice())
                .map_err(|e| Error::generic(e.to_string()))?;
        }
        writer.commit()?;

        if Self::auto_creates_reflog(name) || self.reflog_exists(name)? {
            let (t, tz) = Self::now_seconds_and_tz();
            let entry = Entry {
                old: Oid::null(),
                new: Oid::null(),
                identity: self.identity.clone(),
                time_seconds: t,
                tz_minutes: tz,
                message: message.map(ToOwned::to_owned),
            };
            self.append_reflog_entry(name, &entry)?;
        }
        Ok(())
    }

    fn rename_ref(&self, old: &RefStr, new: &RefStr, message: Option<&str>) -> Result<()> {
        let raw = self
            .read_raw_ref(old)?
            .ok_or_else(|| Error::NotFound(old.to_string()))?;
        let oid = match raw.value {
            RawValue::Direct(o) => o,
            RawValue::Symbolic(_) => {
                return Err(Error::generic("rename_ref does not support symbolic refs"))
            },
        };

        let writer = self.session.write()?;
        {
            let mut refs = writer
                .tx
                .open_table(REFS)
                .map_err(|e| Error::generic(e.to_string()))?;
            self.check_conflicts(&refs, new, &[old])?;

            let value = keys::encode_value(&RawValue::Direct(oid));
            refs.insert(keys::ref_key(new.as_str()).as_slice(), value.as_slice())
                .map_err(|e| Error::generic(e.to_string()))?;
            refs.remove(keys::ref_key(old.as_str()).as_slice())
                .map_err(|e| Error::generic(e.to_string()))?;

            let mut reflog_tbl = writer
                .tx
                .open_table(REFLOG)
                .map_err(|e| Error::generic(e.to_string()))?;
            let old_prefix = keys::reflog_prefix(old.as_str());
            let entries: Vec<(Vec<u8>, Vec<u8>)> = {
                let range = reflog_tbl
                    .range(old_prefix.as_slice()..)
                    .map_err(|e| Error::generic(e.to_string()))?;
                let mut out = Vec::new();
                for item in range {
                    let (k, v) = item.map_err(|e| Error::generic(e.to_string()))?;
                    if !k.value().starts_with(old_prefix.as_slice()) {
                        break;
                    }
                    out.push((k.value().to_vec(), v.value().to_vec()));
                }
                out
            };
            let had_reflog = !entries.is_empty();
            for (old_key, value) in entries {
                let timestamp_suffix = &old_key[old_prefix.len()..];
                let mut new_key = keys::reflog_prefix(new.as_str());
                new_key.extend_from_slice(timestamp_suffix);
                reflog_tbl
                    .insert(new_key.as_slice(), value.as_slice())
                    .map_err(|e| Error::generic(e.to_string()))?;
                reflog_tbl
                    .remove(old_key.as_slice())
                    .map_err(|e| Error::generic(e.to_string()))?;
            }
            if had_reflog {
                let (t, tz) = Self::now_seconds_and_tz();
                let entry = Entry {
                    old: oid,
                    new: oid,
                    identity: self.identity.clone(),
                    time_seconds: t,
                    tz_minutes: tz,
                    message: Some(message.unwrap_or("rename").to_owned()),
                };
                let entry_key = keys::reflog_entry_key(new.as_str(), Self::now_nanos());
                reflog_tbl
                    .insert(entry_key.as_slice(), Self::encode_entry(&entry).as_slice())
                    .map_err(|e| Error::generic(e.to_string()))?;
            }
        }
        writer.commit()
    }

    /// The KV backend keeps no peeled-tag annotation (that is a
    /// packed-refs-catalog concept); always `None`.
    fn peel_ref(&self, _name: &RefStr) -> Result<Option<Oid>> {
        Ok(None)
    }

    fn delete_refs(&self, names: &[&RefStr], message: Option<&str>) -> Result<()> {
        let writer = self.session.write()?;
        {
            let mut refs = writer
                .tx
                .open_table(REFS)
                .map_err(|e| Error::generic(e.to_string()))?;
            let mut reflog_tbl = writer
                .tx
                .open_table(REFLOG)
                .map_err(|e| Error::generic(e.to_string()))?;
            for name in names {
                refs.remove(keys::ref_key(name.as_str()).as_slice())
                    .map_err(|e| Error::generic(e.to_string()))?;

                let header = keys::reflog_header_key(name.as_str());
                if reflog_tbl
                    .get(header.as_slice())
                    .map_err(|e| Error::generic(e.to_string()))?
                    .is_some()
                {
                    let (t, tz) = Self::now_seconds_and_tz();
                    let entry = Entry {
                        old: Oid::null(),
                        new: Oid::null(),
                        identity: self.identity.clone(),
                        time_seconds: t,
                        tz_minutes: tz,
                        message: message.map(ToOwned::to_owned),
                    };
                    let entry_key = keys::reflog_entry_key(name.as_str(), Self::now_nanos());
                    reflog_tbl
                        .insert(entry_key.as_slice(), Self::encode_entry(&entry).as_slice())
                        .map_err(|e| Error::generic(e.to_string()))?;
                }
            }
        }
        writer.commit()
    }

    fn reflog_exists(&self, name: &RefStr) -> Result<bool> {
        let reader = self.session.read()?;
        let reflog_tbl = reader
            .open_table(REFLOG)
            .map_err(|e| Error::generic(e.to_string()))?;
        let exists = reflog_tbl
            .get(keys::reflog_header_key(name.as_str()).as_slice())
            .map_err(|e| Error::generic(e.to_string()))?
            .is_some();
        Ok(exists)
    }

    fn create_reflog(&self, name: &RefStr) -> Result<()> {
        let writer = self.session.write()?;
        {
            let mut reflog_tbl = writer
                .tx
                .open_table(REFLOG)
                .map_err(|e| Error::generic(e.to_string()))?;
            reflog_tbl
                .insert(keys::reflog_header_key(name.as_str()).as_slice(), [].as_slice())
                .map_err(|e| Error::generic(e.to_string()))?;
        }
        writer.commit()
    }

    fn delete_reflog(&self, name: &RefStr) -> Result<()> {
        let writer = self.session.write()?;
        {
            let mut reflog_tbl = writer
                .tx
                .open_table(REFLOG)
                .map_err(|e| Error::generic(e.to_string()))?;
            let prefix = keys::reflog_prefix(name.as_str());
            let keys_to_delete: Vec<Vec<u8>> = {
                let range = reflog_tbl
                    .range(prefix.as_slice()..)
                    .map_err(|e| Error::generic(e.to_string()))?;
                let mut out = Vec::new();
                for item in range {
                    let (k, _) = item.map_err(|e| Error::generic(e.to_string()))?;
                    if !k.value().starts_with(prefix.as_slice()) {
                        break;
                    }
                    out.push(k.value().to_vec());
                }
                out
            };
            for k in keys_to_delete {
                reflog_tbl
                    .remove(k.as_slice())
                    .map_err(|e| Error::generic(e.to_string()))?;
            }
        }
        writer.commit()
    }

    fn for_each_reflog_ent(&self, name: &RefStr, f: &mut ForEachReflogFn<'_>) -> Result<i32> {
        for entry in self.read_reflog_entries(name)? {
            let r = f(&entry);
            if r != 0 {
                return Ok(r);
            }
        }
        Ok(0)
    }

    fn for_each_reflog_ent_reverse(&self, name: &RefStr, f: &mut ForEachReflogFn<'_>) -> Result<i32> {
        for entry in self.read_reflog_entries(name)?.iter().rev() {
            let r = f(entry);
            if r != 0 {
                return Ok(r);
            }
        }
        Ok(0)
    }

    fn reflog_expire(
        &self,
        name: &RefStr,
        opts: ExpireOptions,
        keep: &mut ExpirePredicate<'_>,
    ) -> Result<()> {
        let entries = self.read_reflog_entries_with_keys(name)?;
        let mut last_kept = None;
        let writer = self.session.write()?;
        {
            let mut reflog_tbl = writer
                .tx
                .open_table(REFLOG)
                .map_err(|e| Error::generic(e.to_string()))?;
            for (key, entry) in &entries {
                if keep(entry) {
                    last_kept = Some(entry.new);
                } else {
                    reflog_tbl
                        .remove(key.as_slice())
                        .map_err(|e| Error::generic(e.to_string()))?;
                }
            }
        }
        writer.commit()?;

        if opts.update_ref {
            if let Some(new_oid) = last_kept {
                if let Some(raw) = self.read_raw_ref(name)? {
                    if matches!(raw.value, RawValue::Direct(_)) {
                        let mut tx = Transaction::new();
                        tx.update(name, Some(new_oid), None, Flags::empty(), None)?;
                        let affected: Vec<RefString> =
                            tx.check_unique()?.into_iter().map(ToOwned::to_owned).collect();
                        let affected_refs: Vec<&RefStr> =
                            affected.iter().map(|r| r.as_refstr()).collect();
                        self.commit(&mut tx, &affected_refs)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl KvBackend {
    fn append_reflog_entry(&self, name: &RefStr, entry: &Entry) -> Result<()> {
        let writer = self.session.write()?;
        {
            let mut reflog_tbl = writer
                .tx
                .open_table(REFLOG)
                .map_err(|e| Error::generic(e.to_string()))?;
            let header = keys::reflog_header_key(name.as_str());
            if reflog_tbl
                .get(header.as_slice())
                .map_err(|e| Error::generic(e.to_string()))?
                .is_none()
            {
                reflog_tbl
                    .insert(header.as_slice(), [].as_slice())
                    .map_err(|e| Error::generic(e.to_string()))?;
            }
            let entry_key = keys::reflog_entry_key(name.as_str(), Self::now_nanos());
            reflog_tbl
                .insert(entry_key.as_slice(), Self::encode_entry(entry).as_slice())
                .map_err(|e| Error::generic(e.to_string()))?;
        }
        writer.commit()
    }

    fn read_reflog_entries(&self, name: &RefStr) -> Result<Vec<Entry>> {
        Ok(self
            .read_reflog_entries_with_keys(name)?
            .into_iter()
            .map(|(_, e)| e)
            .collect())
    }

    fn read_reflog_entries_with_keys(&self, name: &RefStr) -> Result<Vec<(Vec<u8>, Entry)>> {
        let reader = self.session.read()?;
        let reflog_tbl = reader
            .open_table(REFLOG)
            .map_err(|e| Error::generic(e.to_string()))?;
        let header = keys::reflog_header_key(name.as_str());
        let prefix = keys::reflog_prefix(name.as_str());
        let range = reflog_tbl
            .range(prefix.as_slice()..)
            .map_err(|e| Error::generic(e.to_string()))?;
        let mut out = Vec::new();
        for item in range {
            let (k, v) = item.map_err(|e| Error::generic(e.to_string()))?;
            let key = k.value().to_vec();
            if !key.starts_with(prefix.as_slice()) {
                break;
            }
            if key == header {
                continue;
            }
            match Self::decode_entry(v.value()) {
                Ok(entry) => out.push((key, entry)),
                Err(e) => {
                    tracing::warn!(refname = %name, %e, "skipping malformed reflog entry");
                },
            }
        }
        Ok(out)
    }
}
