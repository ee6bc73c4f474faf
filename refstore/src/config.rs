// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! The configuration surface of §6: `extensions.refstorage`,
//! `core.logAllRefUpdates`, and the `transfer.hiderefs`/`<section>.hiderefs`
//! hidden-refs list (§4.10 "(expansion) Hidden refs"). Populated by the
//! embedding application from wherever it keeps its on-disk config; this
//! crate only models the values, never reads a config file itself.

#[derive(Clone, Debug, Default)]
pub struct Config {
    /// `extensions.refstorage`. `None` means "files", the default backend.
    pub refstorage: Option<String>,
    /// `core.logAllRefUpdates`.
    pub log_all_ref_updates: bool,
    pub hide_refs: HideRefs,
}

/// A parsed `transfer.hiderefs`/`<section>.hiderefs` list.
///
/// Each entry is either:
/// - a plain prefix, matching any refname that has it as a `/`-delimited
///   path prefix;
/// - an `!`-prefixed negation, un-hiding refnames a later plain entry would
///   otherwise hide;
/// - a `^`-prefixed anchor, matching only the exact, full refname.
#[derive(Clone, Debug, Default)]
pub struct HideRefs {
    patterns: Vec<Pattern>,
}

#[derive(Clone, Debug)]
struct Pattern {
    kind: PatternKind,
    negate: bool,
    text: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PatternKind {
    Prefix,
    FullName,
}

impl HideRefs {
    /// Parse a list of raw config values in the order they were read; later
    /// entries take precedence over earlier ones for a given refname, per
    /// git's own `hideRefs` semantics.
    pub fn parse<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let patterns = values
            .into_iter()
            .map(|raw| {
                let (negate, rest) = match raw.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, raw),
                };
                let (kind, text) = match rest.strip_prefix('^') {
                    Some(rest) => (PatternKind::FullName, rest),
                    None => (PatternKind::Prefix, rest),
                };
                Pattern {
                    kind,
                    negate,
                    text: text.to_owned(),
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// `true` iff `refname` should be omitted from iteration results, per
    /// the last matching pattern in insertion order.
    pub fn hides(&self, refname: &str) -> bool {
        let mut hidden = false;
        for pattern in &self.patterns {
            if pattern.matches(refname) {
                hidden = !pattern.negate;
            }
        }
        hidden
    }
}

impl Pattern {
    fn matches(&self, refname: &str) -> bool {
        match self.kind {
            PatternKind::FullName => refname == self.text,
            PatternKind::Prefix => {
                refname == self.text
                    || refname
                        .strip_prefix(self.text.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_prefix_hides_subtree() {
        let hide = HideRefs::parse(["refs/remote-tracking"]);
        assert!(hide.hides("refs/remote-tracking/origin/main"));
        assert!(!hide.hides("refs/heads/main"));
    }

    #[test]
    fn negation_overrides_earlier_prefix() {
        let hide = HideRefs::parse(["refs/remote-tracking", "!refs/remote-tracking/origin"]);
        assert!(hide.hides("refs/remote-tracking/other/main"));
        assert!(!hide.hides("refs/remote-tracking/origin/main"));
    }

    #[test]
    fn anchor_matches_full_name_only() {
        let hide = HideRefs::parse(["^refs/heads/secret"]);
        assert!(hide.hides("refs/heads/secret"));
        assert!(!hide.hides("refs/heads/secret/nested"));
    }
}
