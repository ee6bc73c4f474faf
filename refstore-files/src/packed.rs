// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! The `packed-refs` catalog (§4.6 "Packed refs", §6 on-disk format):
//! a header line, then a sorted list of `<40hex> SP <refname> LF` records,
//! each optionally followed by a `^<peeled-40hex> LF` line.

use refstore_core::{error::Error, oid::Oid};

pub const HEADER: &str = "# pack-refs with: peeled fully-peeled\n";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub refname: String,
    pub oid: Oid,
    pub peeled: Option<Oid>,
}

#[derive(Clone, Debug, Default)]
pub struct Packed {
    /// Sorted by `refname`; invariant maintained by [`Packed::insert`] and
    /// [`parse`].
    entries: Vec<Entry>,
}

impl Packed {
    pub fn parse(content: &str) -> Result<Self, Error> {
        let mut entries = Vec::new();
        let mut lines = content.lines().peekable();

        if let Some(first) = lines.peek() {
            if first.starts_with('#') {
                lines.next();
            }
        }

        while let Some(line) = lines.next() {
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, ' ');
            let hex = parts
                .next()
                .ok_or_else(|| Error::broken("packed-refs", "missing oid"))?;
            let refname = parts
                .next()
                .ok_or_else(|| Error::broken("packed-refs", format!("missing refname on {line:?}")))?
                .to_owned();
            let oid: Oid = hex
                .parse()
                .map_err(|e| Error::broken("packed-refs", format!("bad oid {hex:?}: {e}")))?;

            let peeled = match lines.peek() {
                Some(next) if next.starts_with('^') => {
                    let p = lines.next().unwrap();
                    Some(
                        p[1..]
                            .parse()
                            .map_err(|e| Error::broken("packed-refs", format!("bad peeled oid: {e}")))?,
                    )
                },
                _ => None,
            };

            entries.push(Entry {
                refname,
                oid,
                peeled,
            });
        }

        entries.sort_by(|a, b| a.refname.cmp(&b.refname));
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn find(&self, refname: &str) -> Option<&Entry> {
        self.entries
            .binary_search_by(|e| e.refname.as_str().cmp(refname))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Insert or replace the entry for `refname`, keeping sort order.
    pub fn upsert(&mut self, refname: &str, oid: Oid, peeled: Option<Oid>) {
        match self.entries.binary_search_by(|e| e.refname.as_str().cmp(refname)) {
            Ok(i) => {
                self.entries[i].oid = oid;
                self.entries[i].peeled = peeled;
            },
            Err(i) => self.entries.insert(
                i,
                Entry {
                    refname: refname.to_owned(),
                    oid,
                    peeled,
                },
            ),
        }
    }

    pub fn remove(&mut self, refname: &str) -> bool {
        match self.entries.binary_search_by(|e| e.refname.as_str().cmp(refname)) {
            Ok(i) => {
                self.entries.remove(i);
                true
            },
            Err(_) => false,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        for e in &self.entries {
            out.push_str(&e.oid.to_string());
            out.push(' ');
            out.push_str(&e.refname);
            out.push('\n');
            if let Some(peeled) = e.peeled {
                out.push('^');
                out.push_str(&peeled.to_string());
                out.push('\n');
            }
        }
        out
    }
}
