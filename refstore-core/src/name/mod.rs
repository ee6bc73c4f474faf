// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! Validated, newtype ref names.
//!
//! [`RefStr`]/[`RefString`] are to `str`/`String` what `Path`/`PathBuf` are to
//! OS strings: thin borrowed/owned wrappers that additionally guarantee their
//! contents satisfy [`check::ref_format`].

pub mod check;

use std::{
    borrow::{Borrow, Cow},
    fmt::{self, Display},
    ops::Deref,
};

pub use check::Error;

const CHECK_OPTS: check::Options = check::Options {
    allow_onelevel: true,
    allow_pattern: false,
};

#[repr(transparent)]
#[derive(Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct RefStr(str);

impl RefStr {
    pub fn try_from_str(s: &str) -> Result<&RefStr, Error> {
        check::ref_format(CHECK_OPTS, s)?;
        Ok(Self::from_str_unchecked(s))
    }

    pub const fn from_str_unchecked(s: &str) -> &RefStr {
        unsafe { &*(s as *const str as *const RefStr) }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_ref_string(&self) -> RefString {
        self.to_owned()
    }

    pub fn strip_prefix(&self, base: &RefStr) -> Option<&RefStr> {
        self.0
            .strip_prefix(base.as_str())
            .and_then(|s| s.strip_prefix('/'))
            .map(Self::from_str_unchecked)
    }

    pub fn join(&self, other: &RefStr) -> RefString {
        let mut buf = self.to_ref_string();
        buf.push(other);
        buf
    }

    pub fn components(&self) -> std::str::Split<'_, char> {
        self.0.split('/')
    }

    /// `true` iff this refname is safe to store outside `refs/...` (i.e. is
    /// an all-caps pseudoref), or stays within `refs/...` once normalized.
    pub fn is_safe(&self) -> bool {
        check::is_safe(&self.0)
    }
}

impl Deref for RefStr {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for RefStr {
    fn as_ref(&self) -> &str {
        self
    }
}

impl AsRef<RefStr> for RefStr {
    fn as_ref(&self) -> &RefStr {
        self
    }
}

impl<'a> TryFrom<&'a str> for &'a RefStr {
    type Error = Error;

    fn try_from(s: &'a str) -> Result<Self, Self::Error> {
        RefStr::try_from_str(s)
    }
}

impl<'a> From<&'a RefStr> for Cow<'a, RefStr> {
    fn from(rs: &'a RefStr) -> Cow<'a, RefStr> {
        Cow::Borrowed(rs)
    }
}

impl Display for RefStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct RefString(String);

impl RefString {
    pub fn as_refstr(&self) -> &RefStr {
        self
    }

    pub fn push(&mut self, other: &RefStr) {
        self.0.push('/');
        self.0.push_str(other.as_str());
    }

    pub fn and(mut self, other: &RefStr) -> Self {
        self.push(other);
        self
    }
}

impl Deref for RefString {
    type Target = RefStr;

    fn deref(&self) -> &Self::Target {
        self.borrow()
    }
}

impl AsRef<RefStr> for RefString {
    fn as_ref(&self) -> &RefStr {
        self
    }
}

impl AsRef<str> for RefString {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl Borrow<RefStr> for RefString {
    fn borrow(&self) -> &RefStr {
        RefStr::from_str_unchecked(self.0.as_str())
    }
}

impl ToOwned for RefStr {
    type Owned = RefString;

    fn to_owned(&self) -> Self::Owned {
        RefString(self.0.to_owned())
    }
}

impl TryFrom<&str> for RefString {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        RefStr::try_from_str(s).map(ToOwned::to_owned)
    }
}

impl TryFrom<String> for RefString {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        check::ref_format(CHECK_OPTS, s.as_str())?;
        Ok(RefString(s))
    }
}

impl From<RefString> for String {
    fn from(rs: RefString) -> Self {
        rs.0
    }
}

impl Display for RefString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A [`RefString`] that has additionally passed the pseudoref-or-escape-safe
/// check (§3 "is safe"). Used for names that may legally live outside
/// `refs/...`.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct SafeRefString(RefString);

impl SafeRefString {
    pub fn new(s: RefString) -> Result<Self, UnsafeName> {
        if s.as_refstr().is_safe() {
            Ok(Self(s))
        } else {
            Err(UnsafeName(s))
        }
    }

    pub fn as_refstr(&self) -> &RefStr {
        self.0.as_refstr()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("refname {0:?} escapes refs/ and is not a valid pseudoref name")]
pub struct UnsafeName(RefString);

pub mod str {
    pub const HEAD: &str = "HEAD";
    pub const FETCH_HEAD: &str = "FETCH_HEAD";
    pub const MERGE_HEAD: &str = "MERGE_HEAD";
    pub const ORIG_HEAD: &str = "ORIG_HEAD";
    pub const REFS: &str = "refs";
    pub const HEADS: &str = "heads";
    pub const TAGS: &str = "tags";
    pub const REMOTES: &str = "remotes";
    pub const NOTES: &str = "notes";
    pub const NAMESPACES: &str = "namespaces";
    pub const REPLACE: &str = "replace";
    pub const BISECT: &str = "bisect";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_display() {
        let refs = RefStr::try_from_str("refs").unwrap();
        let heads = RefStr::try_from_str("heads").unwrap();
        let main = RefStr::try_from_str("main").unwrap();
        let joined = refs.join(heads).and(main);
        assert_eq!(joined.as_refstr().as_str(), "refs/heads/main");
    }

    #[test]
    fn strip_prefix() {
        let full = RefString::try_from("refs/heads/main").unwrap();
        let base = RefStr::try_from_str("refs/heads").unwrap();
        assert_eq!(full.as_refstr().strip_prefix(base).unwrap().as_str(), "main");
    }

    #[test]
    fn rejects_invalid() {
        assert!(RefString::try_from("refs/heads/..").is_err());
        assert!(RefString::try_from("a b").is_err());
    }
}
