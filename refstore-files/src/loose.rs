// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! Parse and render the single-line content of a loose ref file
//! (§4.6 "Loose refs", §6 "Loose ref file").
//!
//! Resolves the §9 open question: the direct-OID arm tolerates leading
//! whitespace, the `ref: ` arm does not.

use refstore_core::{
    error::{Error, Result},
    oid::Oid,
};

pub const SYMREF_PREFIX: &str = "ref: ";

#[derive(Clone, Debug)]
pub enum Content {
    Direct(Oid),
    Symbolic(String),
}

/// Parse the raw bytes of a loose ref file (including its trailing
/// newline, if any).
pub fn parse(path_for_errors: &str, raw: &[u8]) -> Result<Content> {
    let s = std::str::from_utf8(raw)
        .map_err(|_| Error::broken(path_for_errors, "not valid UTF-8"))?;
    let trimmed_end = s.trim_end_matches(['\n', '\r']);

    if let Some(target) = trimmed_end.strip_prefix(SYMREF_PREFIX) {
        // Strict: no leading whitespace tolerated in the symbolic arm.
        return Ok(Content::Symbolic(target.trim_end().to_owned()));
    }

    // Lenient: skip leading ASCII whitespace before the hex digits.
    let hex = trimmed_end.trim_start_matches([' ', '\t']);
    match hex.parse::<Oid>() {
        Ok(oid) => Ok(Content::Direct(oid)),
        Err(e) => Err(Error::broken(path_for_errors, format!("unparseable ref content: {e}"))),
    }
}

pub fn render(content: &Content) -> String {
    match content {
        Content::Direct(oid) => format!("{oid}\n"),
        Content::Symbolic(target) => format!("{SYMREF_PREFIX}{target}\n"),
    }
}
