// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! Encode/decode a single reflog line (§3, §4.4):
//!
//! ```text
//! <40hex> SP <40hex> SP <identity-with-email> SP <unix-seconds> SP <+-HHMM> [TAB <message>] LF
//! ```

use std::fmt::{self, Write as _};

use thiserror::Error;

use crate::oid::{Oid, ParseOidError};

/// Minimum byte length of an encoded line, excluding the optional message
/// and its leading tab (§3: "minimum length 83 bytes").
pub const MIN_LEN: usize = 83;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub old: Oid,
    pub new: Oid,
    /// `Name <email>`, as it appears at rest (no further structure imposed
    /// here - see §3 "identity-with-email").
    pub identity: String,
    pub time_seconds: i64,
    /// Signed offset from UTC in minutes, e.g. `+0200` is `120`.
    pub tz_minutes: i32,
    pub message: Option<String>,
}

#[derive(Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("line shorter than the minimum reflog record length ({0} < {MIN_LEN})")]
    TooShort(usize),
    #[error("malformed separator at byte {0}")]
    BadSeparator(usize),
    #[error("invalid old oid: {0}")]
    OldOid(ParseOidError),
    #[error("invalid new oid: {0}")]
    NewOid(ParseOidError),
    #[error("missing closing '>' in identity")]
    Identity,
    #[error("invalid timestamp")]
    Timestamp,
    #[error("invalid timezone offset")]
    Timezone,
}

/// Fold embedded newlines to spaces, collapse whitespace runs, and trim.
/// (§4.4 "Newlines in message are folded to single spaces, runs of
/// whitespace collapsed, trailing whitespace stripped".)
pub fn normalize_message(msg: &str) -> String {
    let folded: String = msg
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim().to_owned()
}

pub fn encode(
    old: Oid,
    new: Oid,
    identity: &str,
    time_seconds: i64,
    tz_minutes: i32,
    message: Option<&str>,
) -> String {
    let mut out = String::with_capacity(MIN_LEN + message.map_or(0, str::len) + 1);
    let _ = write!(
        out,
        "{} {} {} {} {}",
        old,
        new,
        identity,
        time_seconds,
        format_tz(tz_minutes)
    );
    if let Some(msg) = message {
        let normalized = normalize_message(msg);
        if !normalized.is_empty() {
            out.push('\t');
            out.push_str(&normalized);
        }
    }
    out.push('\n');
    out
}

fn format_tz(tz_minutes: i32) -> String {
    let sign = if tz_minutes < 0 { '-' } else { '+' };
    let abs = tz_minutes.unsigned_abs();
    format!("{}{:02}{:02}", sign, abs / 60, abs % 60)
}

/// Decode one reflog line. `line` must not include the trailing `\n`.
pub fn decode(line: &str) -> Result<Entry, DecodeError> {
    let bytes = line.as_bytes();
    if bytes.len() < MIN_LEN {
        return Err(DecodeError::TooShort(bytes.len()));
    }

    if bytes.get(40) != Some(&b' ') {
        return Err(DecodeError::BadSeparator(40));
    }
    if bytes.get(81) != Some(&b' ') {
        return Err(DecodeError::BadSeparator(81));
    }

    let old: Oid = line[0..40].parse().map_err(DecodeError::OldOid)?;
    let new: Oid = line[41..81].parse().map_err(DecodeError::NewOid)?;

    let rest = &line[82..];
    let gt = rest.find('>').ok_or(DecodeError::Identity)?;
    let identity = rest[..=gt].to_owned();

    let rest = rest[gt + 1..].trim_start_matches(' ');
    let (time_tz, message) = match rest.find('\t') {
        Some(tab) => (&rest[..tab], Some(rest[tab + 1..].to_owned())),
        None => (rest.trim_end_matches('\n'), None),
    };

    let mut fields = time_tz.trim_end().splitn(2, ' ');
    let time_seconds: i64 = fields
        .next()
        .ok_or(DecodeError::Timestamp)?
        .parse()
        .map_err(|_| DecodeError::Timestamp)?;
    let tz_raw = fields.next().ok_or(DecodeError::Timezone)?;
    let tz_minutes = parse_tz(tz_raw)?;

    Ok(Entry {
        old,
        new,
        identity,
        time_seconds,
        tz_minutes,
        message,
    })
}

fn parse_tz(s: &str) -> Result<i32, DecodeError> {
    if s.len() != 5 {
        return Err(DecodeError::Timezone);
    }
    let sign = match s.as_bytes()[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return Err(DecodeError::Timezone),
    };
    let hh: i32 = s[1..3].parse().map_err(|_| DecodeError::Timezone)?;
    let mm: i32 = s[3..5].parse().map_err(|_| DecodeError::Timezone)?;
    Ok(sign * (hh * 60 + mm))
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            encode(
                self.old,
                self.new,
                &self.identity,
                self.time_seconds,
                self.tz_minutes,
                self.message.as_deref()
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(b: u8) -> Oid {
        Oid::from_bytes(&[b; 20]).unwrap()
    }

    #[test]
    fn roundtrip_without_message() {
        let line = encode(oid(0x11), oid(0x22), "A U Thor <a@example.com>", 1_600_000_000, 120, None);
        let decoded = decode(line.trim_end_matches('\n')).unwrap();
        assert_eq!(decoded.old, oid(0x11));
        assert_eq!(decoded.new, oid(0x22));
        assert_eq!(decoded.identity, "A U Thor <a@example.com>");
        assert_eq!(decoded.time_seconds, 1_600_000_000);
        assert_eq!(decoded.tz_minutes, 120);
        assert_eq!(decoded.message, None);
    }

    #[test]
    fn roundtrip_with_message() {
        let line = encode(
            oid(0xaa),
            oid(0xbb),
            "A U Thor <a@example.com>",
            42,
            -330,
            Some("  hello\nworld  "),
        );
        let decoded = decode(line.trim_end_matches('\n')).unwrap();
        assert_eq!(decoded.message.as_deref(), Some("hello world"));
        assert_eq!(decoded.tz_minutes, -330);
        assert_eq!(line, format!("{decoded}"));
    }

    #[test]
    fn rejects_short_lines() {
        assert_eq!(decode("too short"), Err(DecodeError::TooShort(9)));
    }

    #[test]
    fn message_whitespace_is_normalized() {
        assert_eq!(normalize_message("  a\r\nb   c  "), "a b c");
        assert_eq!(normalize_message("\n\n"), "");
    }
}
