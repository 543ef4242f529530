//! Location identifiers.
//!
//! An [`Identifier`] is the human-facing way of naming a point in a routine. The
//! [`Resolver`](crate::Resolver) turns it into concrete `(routine, line)` events.

use crate::error::ResolutionError;
use regex::Regex;
use std::{
    fmt,
    hash::{Hash, Hasher},
};

/// Identifier text that attaches to routine entry.
pub const START: &str = "<start>";
/// Identifier text that attaches to routine return.
pub const RETURN: &str = "<return>";

/// A location specifier.
#[derive(Debug, Clone)]
pub enum Identifier {
    /// An absolute line number.
    Line(u32),
    /// Lines whose stripped text starts with the string.
    Prefix(String),
    /// Lines whose stripped text matches the pattern at its start.
    Pattern(Regex),
    /// `N` lines after the first non-decorator line of the anchor.
    Offset(u32),
    /// Routine entry.
    Start,
    /// Routine return.
    Return,
    /// Lines that satisfy every member.
    All(Vec<Identifier>),
}

impl Identifier {
    /// Parses the textual form of an identifier.
    ///
    /// `<start>` and `<return>` are sentinels, `+N` is a relative offset and
    /// anything else is a line prefix.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text {
            START => Self::Start,
            RETURN => Self::Return,
            _ => text
                .strip_prefix('+')
                .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|n| n.parse().ok())
                .map_or_else(|| Self::Prefix(text.to_owned()), Self::Offset),
        }
    }

    /// Builds a pattern identifier from a regular expression.
    ///
    /// # Errors
    ///
    /// The pattern does not compile.
    pub fn pattern(pattern: &str) -> Result<Self, ResolutionError> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| ResolutionError::InvalidIdentifier {
                identifier: pattern.to_owned(),
                reason: e.to_string(),
            })
    }

    /// Builds an AND tuple. Nested tuples are flattened.
    pub fn all<I>(members: I) -> Self
    where
        I: IntoIterator<Item = Identifier>,
    {
        let mut flat = Vec::new();
        for member in members {
            match member {
                Self::All(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Self::All(flat)
    }

    /// Returns `true` for `<start>` and `<return>`.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self, Self::Start | Self::Return)
    }

    /// The members of the identifier, a single-element slice unless it is a tuple.
    #[must_use]
    pub fn members(&self) -> &[Identifier] {
        match self {
            Self::All(members) => members,
            single => std::slice::from_ref(single),
        }
    }

    /// Whether a stripped source line satisfies a textual identifier.
    ///
    /// Only prefixes and patterns look at text; every other variant returns `false`.
    #[must_use]
    pub fn matches_text(&self, stripped: &str) -> bool {
        match self {
            Self::Prefix(prefix) => stripped.starts_with(prefix.as_str()),
            Self::Pattern(re) => re.find(stripped).is_some_and(|m| m.start() == 0),
            _ => false,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line(n) => write!(f, "{n}"),
            Self::Prefix(s) => write!(f, "{s:?}"),
            Self::Pattern(re) => write!(f, "/{}/", re.as_str()),
            Self::Offset(n) => write!(f, "+{n}"),
            Self::Start => f.write_str(START),
            Self::Return => f.write_str(RETURN),
            Self::All(members) => {
                f.write_str("(")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{m}")?;
                }
                f.write_str(")")
            }
        }
    }
}

// Regexes have no structural equality, identifiers compare by canonical text.
impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Line(a), Self::Line(b)) | (Self::Offset(a), Self::Offset(b)) => a == b,
            (Self::Prefix(a), Self::Prefix(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
            (Self::Start, Self::Start) | (Self::Return, Self::Return) => true,
            (Self::All(a), Self::All(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Line(n) | Self::Offset(n) => n.hash(state),
            Self::Prefix(s) => s.hash(state),
            Self::Pattern(re) => re.as_str().hash(state),
            Self::Start | Self::Return => {}
            Self::All(members) => members.hash(state),
        }
    }
}

impl From<u32> for Identifier {
    fn from(line: u32) -> Self {
        Self::Line(line)
    }
}

impl From<&str> for Identifier {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl From<String> for Identifier {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

impl From<Regex> for Identifier {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}

impl From<Vec<Identifier>> for Identifier {
    fn from(members: Vec<Identifier>) -> Self {
        Self::all(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("<start>", Identifier::Start ; "start sentinel")]
    #[test_case("<return>", Identifier::Return ; "return sentinel")]
    #[test_case("+3", Identifier::Offset(3) ; "offset")]
    #[test_case("+0", Identifier::Offset(0) ; "zero offset")]
    #[test_case("+x", Identifier::Prefix("+x".into()) ; "plus without digits")]
    #[test_case("+", Identifier::Prefix("+".into()) ; "bare plus")]
    #[test_case("return x", Identifier::Prefix("return x".into()) ; "prefix")]
    fn parse(text: &str, expected: Identifier) {
        assert_eq!(Identifier::parse(text), expected);
    }

    #[test]
    fn pattern_matches_only_at_start() {
        let ident = Identifier::pattern(r"x\s*=").unwrap();
        assert!(ident.matches_text("x = 1"));
        assert!(!ident.matches_text("y = x = 1"));
    }

    #[test]
    fn nested_tuples_flatten() {
        let ident = Identifier::all([
            Identifier::from("a"),
            Identifier::all([Identifier::from("b"), Identifier::Line(3)]),
        ]);
        assert_eq!(ident.members().len(), 3);
        assert_eq!(ident.to_string(), r#"("a", "b", 3)"#);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(matches!(
            Identifier::pattern("("),
            Err(ResolutionError::InvalidIdentifier { .. })
        ));
    }
}
