// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

use thiserror::Error;

/// Flags controlling [`ref_format`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Options {
    /// If `false`, the refname must contain at least two components.
    pub allow_onelevel: bool,
    /// If `true`, the refname may contain exactly one `*` character.
    pub allow_pattern: bool,
}

#[derive(Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("empty input")]
    Empty,
    #[error("lone '@' character")]
    LoneAt,
    #[error("empty or consecutive slash-separated component")]
    Slash,
    #[error("component ends with '.lock'")]
    DotLock,
    #[error("consecutive dots ('..')")]
    DotDot,
    #[error("at-open-brace ('@{{')")]
    AtOpenBrace,
    #[error("invalid character {0:?}")]
    InvalidChar(char),
    #[error("component starts with '.'")]
    StartsDot,
    #[error("component ends with '.'")]
    EndsDot,
    #[error("control character")]
    Control,
    #[error("whitespace")]
    Space,
    #[error("must contain at most one '*'")]
    Pattern,
    #[error("must contain at least two components")]
    OneLevel,
}

/// Validate that a string slice is a legal refname per the rules in §3 of the
/// reference-store specification.
///
/// This is a left-to-right, single pass over each `/`-separated component.
pub fn ref_format(opts: Options, s: &str) -> Result<(), Error> {
    match s {
        "" => Err(Error::Empty),
        "@" => Err(Error::LoneAt),
        _ => {
            let mut globs = 0usize;
            let mut parts = 0usize;

            for x in s.split('/') {
                if x.is_empty() {
                    return Err(Error::Slash);
                }

                parts += 1;

                if x.ends_with(".lock") {
                    return Err(Error::DotLock);
                }

                let chars: Vec<char> = x.chars().collect();
                for (i, &c) in chars.iter().enumerate() {
                    let next = chars.get(i + 1).copied();
                    match (c, next) {
                        ('.', Some('.')) => return Err(Error::DotDot),
                        ('@', Some('{')) => return Err(Error::AtOpenBrace),

                        ('\0', _) => return Err(Error::InvalidChar('\0')),
                        ('\\', _) => return Err(Error::InvalidChar('\\')),
                        ('~', _) => return Err(Error::InvalidChar('~')),
                        ('^', _) => return Err(Error::InvalidChar('^')),
                        (':', _) => return Err(Error::InvalidChar(':')),
                        ('?', _) => return Err(Error::InvalidChar('?')),
                        ('[', _) => return Err(Error::InvalidChar('[')),

                        ('*', _) => globs += 1,

                        ('.', _) if i == 0 => return Err(Error::StartsDot),
                        ('.', _) if i == chars.len() - 1 => return Err(Error::EndsDot),

                        (z, _) if z.is_ascii_control() => return Err(Error::Control),
                        (z, _) if z.is_whitespace() => return Err(Error::Space),

                        _ => continue,
                    }
                }
            }

            if parts < 2 && !opts.allow_onelevel {
                Err(Error::OneLevel)
            } else if globs > 1 && opts.allow_pattern {
                Err(Error::Pattern)
            } else if globs > 0 && !opts.allow_pattern {
                Err(Error::InvalidChar('*'))
            } else {
                Ok(())
            }
        },
    }
}

/// Check the `refs/...` path-escape rule and the uppercase-pseudoref rule
/// (§3 "A refname is 'safe' only if ..."). Does *not* re-run [`ref_format`].
pub fn is_safe(s: &str) -> bool {
    if let Some(rest) = s.strip_prefix("refs/") {
        !normalizes_outside(rest)
    } else {
        is_pseudoref_form(s)
    }
}

/// `true` if the (already slash-stripped) path would, after normalizing `.`
/// and `..` components, climb above its own root.
fn normalizes_outside(path: &str) -> bool {
    let mut depth: i64 = 0;
    for comp in path.split('/') {
        match comp {
            "" | "." => continue,
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            },
            _ => depth += 1,
        }
    }
    false
}

pub fn is_pseudoref_form(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const LENIENT: Options = Options {
        allow_onelevel: true,
        allow_pattern: false,
    };

    #[test]
    fn rejects_empty() {
        assert_eq!(ref_format(LENIENT, ""), Err(Error::Empty));
    }

    #[test]
    fn rejects_lone_at() {
        assert_eq!(ref_format(LENIENT, "@"), Err(Error::LoneAt));
    }

    #[test]
    fn rejects_dotdot() {
        assert_eq!(
            ref_format(LENIENT, "refs/heads/../etc"),
            Err(Error::DotDot)
        );
    }

    #[test]
    fn rejects_dot_lock_suffix() {
        assert_eq!(
            ref_format(LENIENT, "refs/heads/main.lock"),
            Err(Error::DotLock)
        );
    }

    #[test]
    fn accepts_normal_branch() {
        assert_eq!(ref_format(LENIENT, "refs/heads/main"), Ok(()));
    }

    #[test]
    fn onelevel_requires_flag() {
        let strict = Options {
            allow_onelevel: false,
            allow_pattern: false,
        };
        assert_eq!(ref_format(strict, "HEAD"), Err(Error::OneLevel));
        assert_eq!(ref_format(LENIENT, "HEAD"), Ok(()));
    }

    #[test]
    fn pattern_requires_flag() {
        assert_eq!(
            ref_format(LENIENT, "refs/heads/*"),
            Err(Error::InvalidChar('*'))
        );
        let pattern = Options {
            allow_onelevel: true,
            allow_pattern: true,
        };
        assert_eq!(ref_format(pattern, "refs/heads/*"), Ok(()));
        assert_eq!(ref_format(pattern, "refs/*/*"), Err(Error::Pattern));
    }

    #[test]
    fn escape_rule() {
        assert!(!is_safe("refs/../../etc/passwd"));
        assert!(is_safe("refs/heads/main"));
    }

    #[test]
    fn pseudoref_form() {
        assert!(is_safe("HEAD"));
        assert!(is_safe("FETCH_HEAD"));
        assert!(!is_safe("Head"));
        assert!(!is_safe("refs"));
    }
}
