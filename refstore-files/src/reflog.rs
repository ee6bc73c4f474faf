// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! Per-ref reflog files (§4.6 "Reflog operations"): append under lock,
//! forward/reverse iteration, and expiry via predicate + rewrite.

use std::{
    fs,
    io::{BufRead, Write as _},
    path::Path,
};

use refstore_core::{
    backend::{ExpireOptions, ExpirePredicate},
    error::Result,
    oid::Oid,
    reflog::{self, Entry},
};

use crate::lock::{self, LockTimeout};

pub fn exists(path: &Path) -> bool {
    path.is_file()
}

pub fn create(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if !path.is_file() {
        fs::OpenOptions::new().create(true).write(true).open(path)?;
    }
    Ok(())
}

pub fn delete(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Append one record. Creates the file (and its parent directory) if it
/// does not exist yet.
pub fn append(path: &Path, old: Oid, new: Oid, identity: &str, time_seconds: i64, tz_minutes: i32, message: Option<&str>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let line = reflog::encode(old, new, identity, time_seconds, tz_minutes, message);
    let mut f = fs::OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(line.as_bytes())?;
    f.flush()?;
    Ok(())
}

fn read_all(path: &Path) -> Result<Vec<Entry>> {
    let f = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for line in std::io::BufReader::new(f).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match reflog::decode(&line) {
            Ok(entry) => out.push(entry),
            Err(e) => {
                tracing::warn!(%e, path = %path.display(), "skipping malformed reflog line");
            },
        }
    }
    Ok(out)
}

pub fn for_each(path: &Path, f: &mut dyn FnMut(&Entry) -> i32) -> Result<i32> {
    for entry in read_all(path)? {
        let r = f(&entry);
        if r != 0 {
            return Ok(r);
        }
    }
    Ok(0)
}

pub fn for_each_reverse(path: &Path, f: &mut dyn FnMut(&Entry) -> i32) -> Result<i32> {
    for entry in read_all(path)?.iter().rev() {
        let r = f(entry);
        if r != 0 {
            return Ok(r);
        }
    }
    Ok(0)
}

/// Apply `keep` to every entry, rewrite the survivors to a temp file, and
/// rename over `path`. Returns the new value of the last surviving entry,
/// for the caller to apply when `opts.update_ref` is set.
pub fn expire(
    path: &Path,
    opts: ExpireOptions,
    keep: &mut ExpirePredicate<'_>,
) -> Result<Option<Oid>> {
    let entries = read_all(path)?;
    let survivors: Vec<&Entry> = entries.iter().filter(|e| keep(e)).collect();

    let mut out = String::new();
    for e in &survivors {
        out.push_str(&e.to_string());
    }
    lock::write_and_commit(path, out.as_bytes(), LockTimeout::Immediate)?;

    if opts.update_ref {
        Ok(survivors.last().map(|e| e.new))
    } else {
        Ok(None)
    }
}
