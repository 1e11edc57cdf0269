//! Nottable values: the atomic unit of matchable configuration.
//!
//! A `NottableValue` is a string that can be negated (`!value`) or, when used
//! as the key of a multi-value collection, marked optional (`?value`). Values
//! are immutable once built; the regex compiled from the value is cached the
//! first time it is needed and shared between clones.

use once_cell::sync::OnceCell;
use regex::{Regex, RegexBuilder};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const NOT_PREFIX: char = '!';
const OPTIONAL_PREFIX: char = '?';

/// Lazily compiled, anchored regex forms of a value.
#[derive(Debug, Default)]
struct CompiledPattern {
    exact: OnceCell<Option<Regex>>,
    folded: OnceCell<Option<Regex>>,
}

impl CompiledPattern {
    fn get(&self, value: &str, ignore_case: bool) -> Option<&Regex> {
        let cell = if ignore_case { &self.folded } else { &self.exact };
        cell.get_or_init(|| {
            RegexBuilder::new(&format!("^(?:{value})$"))
                .case_insensitive(ignore_case)
                .build()
                .ok()
        })
        .as_ref()
    }
}

/// A string that may be logically negated or marked optional.
#[derive(Clone)]
pub struct NottableValue {
    value: String,
    not: bool,
    optional: bool,
    pattern: Arc<CompiledPattern>,
}

impl NottableValue {
    fn build(value: impl Into<String>, not: bool, optional: bool) -> Self {
        Self {
            value: value.into(),
            not,
            optional,
            pattern: Arc::new(CompiledPattern::default()),
        }
    }

    /// A plain (un-negated, required) value.
    pub fn new(value: impl Into<String>) -> Self {
        Self::build(value, false, false)
    }

    /// A negated value: matches whatever `value` does not.
    pub fn not(value: impl Into<String>) -> Self {
        Self::build(value, true, false)
    }

    /// An optional key: may be absent from the matched collection.
    pub fn optional(value: impl Into<String>) -> Self {
        Self::build(value, false, true)
    }

    pub fn with_flags(value: impl Into<String>, not: bool, optional: bool) -> Self {
        Self::build(value, not, optional)
    }

    /// Parse the prefixed string form: `?` marks optional, `!` marks negation.
    ///
    /// `?!name` is an optional, negated key. A lone `!` or `?` is kept literal.
    pub fn parse(raw: &str) -> Self {
        let mut rest = raw;
        let mut optional = false;
        let mut not = false;
        if rest.len() > 1 && rest.starts_with(OPTIONAL_PREFIX) {
            optional = true;
            rest = &rest[1..];
        }
        if rest.len() > 1 && rest.starts_with(NOT_PREFIX) {
            not = true;
            rest = &rest[1..];
        }
        Self::build(rest, not, optional)
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_not(&self) -> bool {
        self.not
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }

    /// Same value with the negation removed; shares the compiled regex.
    pub fn un_notted(&self) -> Self {
        Self {
            value: self.value.clone(),
            not: false,
            optional: self.optional,
            pattern: Arc::clone(&self.pattern),
        }
    }

    /// Anchored regex for this value, or `None` when it is not a valid regex.
    pub(crate) fn regex(&self, ignore_case: bool) -> Option<&Regex> {
        self.pattern.get(&self.value, ignore_case)
    }

    fn needs_object_form(&self) -> bool {
        self.value.starts_with(NOT_PREFIX) || self.value.starts_with(OPTIONAL_PREFIX)
    }
}

impl PartialEq for NottableValue {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.not == other.not && self.optional == other.optional
    }
}

impl Eq for NottableValue {}

impl Hash for NottableValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
        self.not.hash(state);
        self.optional.hash(state);
    }
}

impl fmt::Display for NottableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            write!(f, "{OPTIONAL_PREFIX}")?;
        }
        if self.not {
            write!(f, "{NOT_PREFIX}")?;
        }
        f.write_str(&self.value)
    }
}

impl fmt::Debug for NottableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

impl From<&str> for NottableValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NottableValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&String> for NottableValue {
    fn from(value: &String) -> Self {
        Self::new(value.as_str())
    }
}

impl Serialize for NottableValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if !self.needs_object_form() {
            return serializer.serialize_str(&self.to_string());
        }
        let mut map = serializer.serialize_map(None)?;
        if self.not {
            map.serialize_entry("not", &true)?;
        }
        if self.optional {
            map.serialize_entry("optional", &true)?;
        }
        map.serialize_entry("value", &self.value)?;
        map.end()
    }
}

/// Object form accepted on input: `{"not": true, "value": "..."}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum NottableValueRaw {
    Plain(String),
    Object {
        value: String,
        #[serde(default)]
        not: bool,
        #[serde(default)]
        optional: bool,
    },
    Number(serde_json::Number),
    Bool(bool),
}

impl<'de> Deserialize<'de> for NottableValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match NottableValueRaw::deserialize(deserializer)
            .map_err(|_| de::Error::custom("expected a string or {\"not\", \"value\"} object"))?
        {
            NottableValueRaw::Plain(raw) => Ok(Self::parse(&raw)),
            NottableValueRaw::Object {
                value,
                not,
                optional,
            } => Ok(Self::with_flags(value, not, optional)),
            NottableValueRaw::Number(n) => Ok(Self::new(n.to_string())),
            NottableValueRaw::Bool(b) => Ok(Self::new(b.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefixes() {
        let plain = NottableValue::parse("Content-Type");
        assert!(!plain.is_not());
        assert!(!plain.is_optional());

        let notted = NottableValue::parse("!Content-Type");
        assert!(notted.is_not());
        assert_eq!(notted.value(), "Content-Type");

        let optional = NottableValue::parse("?X-Trace");
        assert!(optional.is_optional());
        assert!(!optional.is_not());

        let both = NottableValue::parse("?!X-Trace");
        assert!(both.is_optional());
        assert!(both.is_not());
        assert_eq!(both.value(), "X-Trace");

        // A lone prefix character is a literal value
        assert_eq!(NottableValue::parse("!").value(), "!");
    }

    #[test]
    fn test_display_round_trips_flags() {
        assert_eq!(NottableValue::not("a").to_string(), "!a");
        assert_eq!(NottableValue::optional("a").to_string(), "?a");
        assert_eq!(NottableValue::with_flags("a", true, true).to_string(), "?!a");
    }

    #[test]
    fn test_un_notted_keeps_value() {
        let notted = NottableValue::not("abc");
        let plain = notted.un_notted();
        assert!(!plain.is_not());
        assert_eq!(plain, NottableValue::new("abc"));
    }

    #[test]
    fn test_regex_compilation_is_anchored() {
        let value = NottableValue::new("ab+");
        let regex = value.regex(false).unwrap();
        assert!(regex.is_match("abbb"));
        assert!(!regex.is_match("xabbb"));

        let invalid = NottableValue::new("[");
        assert!(invalid.regex(false).is_none());
    }

    #[test]
    fn test_serde_string_and_object_forms() {
        let value: NottableValue = serde_json::from_str(r#""!GET""#).unwrap();
        assert_eq!(value, NottableValue::not("GET"));

        let value: NottableValue =
            serde_json::from_str(r#"{"not": true, "value": "POST"}"#).unwrap();
        assert_eq!(value, NottableValue::not("POST"));

        let value: NottableValue = serde_json::from_str("42").unwrap();
        assert_eq!(value.value(), "42");

        assert_eq!(
            serde_json::to_string(&NottableValue::not("GET")).unwrap(),
            r#""!GET""#
        );
        // Values that would be mistaken for prefixes use the object form
        assert_eq!(
            serde_json::to_string(&NottableValue::new("!bang")).unwrap(),
            r#"{"value":"!bang"}"#
        );
    }
}
