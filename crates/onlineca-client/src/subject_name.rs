// crates/onlineca-client/src/subject_name.rs
// ============================================================================
// Module: Subject Name Codec
// Description: Distinguished name parsing and serialization.
// Purpose: Convert between `/`- and `,`-delimited DN text and ordered fields.
// Dependencies: indexmap, regex, x509-parser
// ============================================================================

//! ## Overview
//! A [`DistinguishedName`] is an ordered mapping from canonical long-form
//! attribute keys (`commonName`, `organizationName`, ...) to one or more
//! values. Text input accepts either short (`CN`) or long keys.
//! Invariants:
//! - Keys are stored in canonical long form when known.
//! - Equality ignores field order; serialization is deterministic for a given
//!   separator and sort flag.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;
use x509_parser::objects::oid_registry;
use x509_parser::objects::oid2abbrev;
use x509_parser::x509::X509Name;

// ============================================================================
// SECTION: Attribute Table
// ============================================================================

/// Known attributes as (long form, short form).
const ATTRIBUTES: [(&str, &str); 10] = [
    ("commonName", "CN"),
    ("organizationalUnitName", "OU"),
    ("organizationName", "O"),
    ("countryName", "C"),
    ("emailAddress", "EMAILADDRESS"),
    ("localityName", "L"),
    ("stateOrProvinceName", "ST"),
    ("streetAddress", "STREET"),
    ("domainComponent", "DC"),
    ("userid", "UID"),
];

/// Alternation of every accepted key, longest first.
fn key_alternation() -> String {
    let mut keys: Vec<&str> =
        ATTRIBUTES.iter().flat_map(|(long, short)| [*long, *short]).collect();
    keys.sort_by_key(|key| std::cmp::Reverse(key.len()));
    keys.join("|")
}

/// Slash grammar: `/KEY=value/KEY=value`.
static SLASH_GRAMMAR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(&format!("/({})=", key_alternation())).ok());

/// Comma grammar: `KEY=value, KEY=value` with an optional leading comma.
static COMMA_GRAMMAR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(&format!(r"(?:^|,)\s*({})=", key_alternation())).ok());

/// Returns the canonical long-form key for a short or long attribute name.
fn canonical_key(key: &str) -> Option<&'static str> {
    ATTRIBUTES
        .iter()
        .find(|(long, short)| long.eq_ignore_ascii_case(key) || short.eq_ignore_ascii_case(key))
        .map(|(long, _)| *long)
}

/// Returns the short form used when serializing a key.
fn short_key(key: &str) -> &str {
    ATTRIBUTES.iter().find(|(long, _)| *long == key).map_or(key, |(_, short)| *short)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Distinguished name parsing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubjectNameError {
    /// Text does not match the selected delimiter grammar.
    #[error("subject name parse error: {0}")]
    Parse(String),
}

// ============================================================================
// SECTION: Distinguished Name
// ============================================================================

/// Field delimiter convention for DN text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// OpenSSL one-line form: `/CN=foo/O=bar`.
    Slash,
    /// RFC 4514 style form: `CN=foo,O=bar`.
    Comma,
}

impl Separator {
    /// Returns the delimiter character.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Slash => "/",
            Self::Comma => ",",
        }
    }

    /// Returns the compiled grammar for this delimiter.
    fn grammar(self) -> Result<&'static Regex, SubjectNameError> {
        let grammar = match self {
            Self::Slash => SLASH_GRAMMAR.as_ref(),
            Self::Comma => COMMA_GRAMMAR.as_ref(),
        };
        grammar.ok_or_else(|| SubjectNameError::Parse("grammar failed to compile".to_string()))
    }
}

/// Ordered distinguished name with multi-valued attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    /// Canonical key to values, in first-seen order.
    fields: IndexMap<String, Vec<String>>,
}

impl DistinguishedName {
    /// Creates an empty name.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value, canonicalizing known keys.
    pub fn push(&mut self, key: &str, value: impl Into<String>) {
        let key = canonical_key(key).map_or_else(|| key.to_string(), str::to_string);
        self.fields.entry(key).or_default().push(value.into());
    }

    /// Returns the values recorded for a key (short or long form).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        let key = canonical_key(key).unwrap_or(key);
        self.fields.get(key).map(Vec::as_slice)
    }

    /// Iterates fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields.iter().map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Returns the number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true when no fields are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses DN text. With no separator the slash grammar is tried first.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectNameError::Parse`] when the text matches neither
    /// grammar.
    pub fn parse(text: &str, separator: Option<Separator>) -> Result<Self, SubjectNameError> {
        match separator {
            Some(separator) => parse_with(text, separator),
            None => parse_with(text, Separator::Slash)
                .or_else(|_| parse_with(text, Separator::Comma))
                .map_err(|_| {
                    SubjectNameError::Parse(format!("no delimiter grammar matches '{text}'"))
                }),
        }
    }

    /// Serializes the name with short keys.
    ///
    /// Multi-valued attributes are written as adjacent `KEY=value` pairs. With
    /// the slash separator the output starts with `/`.
    #[must_use]
    pub fn serialize(&self, separator: Separator, sort: bool) -> String {
        let delimiter = separator.as_str();
        let mut items: Vec<String> = self
            .fields
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(key, values)| {
                let key = short_key(key);
                values.iter().map(|value| format!("{key}={value}")).collect::<Vec<_>>().join(delimiter)
            })
            .collect();
        if sort {
            items.sort();
        }
        let body = items.join(delimiter);
        match separator {
            Separator::Slash => format!("/{body}"),
            Separator::Comma => body,
        }
    }

    /// Builds a name from a decoded X.509 name.
    ///
    /// Attributes whose value is not a string type are skipped; unknown
    /// attribute types are keyed by their registry abbreviation or dotted OID.
    #[must_use]
    pub fn from_x509(name: &X509Name<'_>) -> Self {
        let mut dn = Self::new();
        for rdn in name.iter_rdn() {
            for attribute in rdn.iter() {
                let Ok(value) = attribute.as_str() else {
                    continue;
                };
                let oid = attribute.attr_type();
                let key = oid2abbrev(oid, oid_registry())
                    .map_or_else(|_| oid.to_id_string(), str::to_string);
                dn.push(&key, value);
            }
        }
        dn
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize(Separator::Slash, false))
    }
}

/// Splits DN text on the grammar's key markers.
fn parse_with(text: &str, separator: Separator) -> Result<DistinguishedName, SubjectNameError> {
    let grammar = separator.grammar()?;
    let markers: Vec<(usize, usize, &str)> = grammar
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?;
            Some((whole.start(), whole.end(), key.as_str()))
        })
        .collect();
    let Some((first_start, ..)) = markers.first() else {
        return Err(SubjectNameError::Parse(format!(
            "no {} delimited fields in '{text}'",
            separator.as_str()
        )));
    };
    if !text[.. *first_start].trim().is_empty() {
        return Err(SubjectNameError::Parse(format!("unexpected leading text in '{text}'")));
    }
    let mut dn = DistinguishedName::new();
    for (index, (_, value_start, key)) in markers.iter().enumerate() {
        let value_end = markers.get(index + 1).map_or(text.len(), |(start, ..)| *start);
        dn.push(key.trim(), text[*value_start .. value_end].trim());
    }
    Ok(dn)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::DistinguishedName;
    use super::Separator;
    use super::SubjectNameError;

    /// Tests that slash-form names render back to the same text.
    #[test]
    fn slash_form_round_trips() {
        let dn = DistinguishedName::parse("/CN=foo/O=bar", None).unwrap();
        assert_eq!(dn.get("commonName"), Some(&["foo".to_string()][..]));
        assert_eq!(dn.get("O"), Some(&["bar".to_string()][..]));
        let text = dn.serialize(Separator::Slash, true);
        assert_eq!(text, "/CN=foo/O=bar");
        assert_eq!(DistinguishedName::parse(&text, None).unwrap(), dn);
    }

    /// Tests that comma and slash forms parse to the same name.
    #[test]
    fn comma_form_matches_slash_form() {
        let slash = DistinguishedName::parse("/CN=foo/O=bar", Some(Separator::Slash)).unwrap();
        let comma = DistinguishedName::parse(",CN=foo, O=bar", Some(Separator::Comma)).unwrap();
        assert_eq!(slash, comma);
    }

    /// Tests that field order does not affect equality.
    #[test]
    fn equality_ignores_field_order() {
        let forward = DistinguishedName::parse("/CN=foo/O=bar", None).unwrap();
        let reverse = DistinguishedName::parse("/O=bar/CN=foo", None).unwrap();
        assert_eq!(forward, reverse);
        assert_eq!(reverse.serialize(Separator::Slash, false), "/O=bar/CN=foo");
        assert_eq!(reverse.serialize(Separator::Slash, true), "/CN=foo/O=bar");
    }

    /// Tests that repeated keys collect every value.
    #[test]
    fn repeated_keys_become_multi_valued() {
        let dn = DistinguishedName::parse("/DC=org/DC=example/CN=alice", None).unwrap();
        assert_eq!(dn.get("domainComponent").unwrap(), ["org", "example"]);
        assert_eq!(dn.serialize(Separator::Slash, false), "/DC=org/DC=example/CN=alice");
        assert_eq!(dn.serialize(Separator::Comma, false), "DC=org,DC=example,CN=alice");
    }

    /// Tests that long attribute keys map to their short form.
    #[test]
    fn long_keys_are_accepted() {
        let dn = DistinguishedName::parse("/commonName=foo/organizationName=bar", None).unwrap();
        assert_eq!(dn, DistinguishedName::parse("/CN=foo/O=bar", None).unwrap());
    }

    /// Tests that text with no fields is rejected.
    #[test]
    fn text_without_fields_is_rejected() {
        let err = DistinguishedName::parse("just some text", None).unwrap_err();
        assert!(matches!(err, SubjectNameError::Parse(_)));
    }

    /// Tests that text before the first separator is rejected.
    #[test]
    fn leading_garbage_is_rejected_for_explicit_grammar() {
        let err = DistinguishedName::parse("xx/CN=foo", Some(Separator::Slash)).unwrap_err();
        assert!(matches!(err, SubjectNameError::Parse(_)));
    }
}
