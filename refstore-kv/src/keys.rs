// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! Key/value encoding for the KV backend (§4.7 "Encoding").

use refstore_core::{
    backend::RawValue,
    error::Error,
    oid::Oid,
};

/// `<refname>\0`.
pub fn ref_key(refname: &str) -> Vec<u8> {
    let mut k = refname.as_bytes().to_vec();
    k.push(0);
    k
}

/// `logs/<refname>\0` + 8 zero bytes. Existence is the "reflog exists"
/// signal.
pub fn reflog_header_key(refname: &str) -> Vec<u8> {
    let mut k = reflog_prefix(refname);
    k.extend_from_slice(&[0u8; 8]);
    k
}

/// `logs/<refname>\0` + 8-byte big-endian nanosecond timestamp.
pub fn reflog_entry_key(refname: &str, nanos: u64) -> Vec<u8> {
    let mut k = reflog_prefix(refname);
    k.extend_from_slice(&nanos.to_be_bytes());
    k
}

/// `logs/<refname>\0`, the common prefix of the header key and every entry
/// key for `refname`.
pub fn reflog_prefix(refname: &str) -> Vec<u8> {
    let mut k = format!("logs/{refname}").into_bytes();
    k.push(0);
    k
}

pub fn encode_value(value: &RawValue) -> Vec<u8> {
    let mut v = match value {
        RawValue::Direct(oid) => oid.to_string().into_bytes(),
        RawValue::Symbolic(target) => format!("ref: {target}").into_bytes(),
    };
    v.push(0);
    v
}

pub fn decode_value(bytes: &[u8]) -> Result<RawValue, Error> {
    let bytes = bytes.strip_suffix(&[0u8]).unwrap_or(bytes);
    let s = std::str::from_utf8(bytes).map_err(|_| Error::broken("<kv>", "value is not UTF-8"))?;
    if let Some(target) = s.strip_prefix("ref: ") {
        Ok(RawValue::Symbolic(target.to_owned()))
    } else {
        let oid: Oid = s
            .parse()
            .map_err(|e| Error::broken("<kv>", format!("bad oid {s:?}: {e}")))?;
        Ok(RawValue::Direct(oid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(b: u8) -> Oid {
        Oid::from_bytes(&[b; 20]).unwrap()
    }

    #[test]
    fn value_roundtrip_direct() {
        let v = RawValue::Direct(oid(1));
        let encoded = encode_value(&v);
        match decode_value(&encoded).unwrap() {
            RawValue::Direct(o) => assert_eq!(o, oid(1)),
            _ => panic!("expected direct"),
        }
    }

    #[test]
    fn value_roundtrip_symbolic() {
        let v = RawValue::Symbolic("refs/heads/main".to_owned());
        let encoded = encode_value(&v);
        match decode_value(&encoded).unwrap() {
            RawValue::Symbolic(t) => assert_eq!(t, "refs/heads/main"),
            _ => panic!("expected symbolic"),
        }
    }

    #[test]
    fn reflog_keys_share_prefix_and_sort_chronologically() {
        let header = reflog_header_key("refs/heads/main");
        let e1 = reflog_entry_key("refs/heads/main", 1);
        let e2 = reflog_entry_key("refs/heads/main", 2);
        assert!(header < e1);
        assert!(e1 < e2);
        assert!(e1.starts_with(&reflog_prefix("refs/heads/main")));
    }
}
