//! Composite field codec.
//!
//! Splits atomic-looking values (emails, full names) into ordered sub-fields
//! so each token can be permuted across rows on its own, then reassembles
//! them. The codec is pure: it never draws randomness and never fails. A value
//! without the expected delimiter simply decomposes into a single sub-field.
//!
//! Normalization on recomposition:
//! - email local parts are re-joined with `.`, so `ana_lopez@x.com` comes back
//!   as `ana.lopez@x.com`;
//! - names are re-joined with a single space;
//! - empty tokens (`a..b`, double spaces) are dropped.
//!
//! Values already in that normal form round-trip exactly.

use crate::models::ColumnKind;

/// A value split into sub-fields plus the part that never moves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decomposed {
    /// Ordered sub-fields; empty for a NULL input
    pub parts: Vec<Option<String>>,
    /// Immutable suffix (`@domain` for emails)
    pub suffix: Option<String>,
}

impl Decomposed {
    /// Decomposition of a NULL value.
    pub fn null() -> Self {
        Self::default()
    }

    /// True when the value produced exactly one token.
    pub fn is_single_token(&self) -> bool {
        self.parts.len() == 1
    }
}

fn is_email_delimiter(c: char) -> bool {
    c == '.' || c == '_'
}

fn is_name_delimiter(c: char) -> bool {
    c == '.' || c.is_whitespace()
}

fn tokens(value: &str, delimiter: fn(char) -> bool) -> Vec<Option<String>> {
    value
        .split(delimiter)
        .filter(|token| !token.is_empty())
        .map(|token| Some(token.to_string()))
        .collect()
}

/// Splits a value into sub-fields according to its kind.
///
/// Kinds that are not composite decompose to the identity: one sub-field
/// equal to the value and no suffix.
pub fn decompose(value: Option<&str>, kind: ColumnKind) -> Decomposed {
    let Some(value) = value else {
        return Decomposed::null();
    };

    match kind {
        ColumnKind::Email => {
            let (local, suffix) = match value.find('@') {
                Some(at) => (&value[..at], Some(value[at..].to_string())),
                None => (value, None),
            };
            Decomposed {
                parts: tokens(local, is_email_delimiter),
                suffix,
            }
        }
        ColumnKind::PersonName => Decomposed {
            parts: tokens(value, is_name_delimiter),
            suffix: None,
        },
        _ => Decomposed {
            parts: vec![Some(value.to_string())],
            suffix: None,
        },
    }
}

/// Reassembles sub-fields produced by [`decompose`].
///
/// Returns `None` when no sub-field carries text, which is how a NULL input
/// comes back out.
pub fn recompose(parts: &[Option<String>], suffix: Option<&str>, kind: ColumnKind) -> Option<String> {
    let present: Vec<&str> = parts
        .iter()
        .flatten()
        .map(String::as_str)
        .filter(|part| !part.is_empty() || !kind.is_composite())
        .collect();

    match kind {
        ColumnKind::Email => {
            if present.is_empty() {
                return None;
            }
            let mut email = present.join(".");
            if let Some(suffix) = suffix {
                email.push_str(suffix);
            }
            Some(email)
        }
        ColumnKind::PersonName => {
            if present.is_empty() {
                return None;
            }
            Some(present.join(" "))
        }
        _ => present.first().map(|part| (*part).to_string()),
    }
}
