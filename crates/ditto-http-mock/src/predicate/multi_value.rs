//! Multi-value collections (headers, cookies, query and path parameters) and
//! the containment algorithms used to compare a pattern collection against an
//! actual one.

use super::nottable::NottableValue;
use super::string_matcher::RegexStringMatcher;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// How a pattern collection is compared against an actual collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyMatchStyle {
    /// Every pattern entry must be found, each by a distinct actual entry.
    #[default]
    SubSet,
    /// For every pattern key, all actual values under that key must match
    /// one of the pattern values.
    MatchingKey,
}

/// A single key/value pair taken from a `MultiValueMap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiValueEntry {
    pub key: NottableValue,
    pub value: NottableValue,
}

impl MultiValueEntry {
    pub fn new(key: impl Into<NottableValue>, value: impl Into<NottableValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Entry equality under the supplied matchers.
    ///
    /// Entries are equal when both key and value match, or when the keys do
    /// not match but either key is optional (an optional key may be absent).
    pub fn matches(
        &self,
        keys: &RegexStringMatcher,
        values: &RegexStringMatcher,
        other: &MultiValueEntry,
    ) -> bool {
        if keys.matches(&self.key, &other.key) {
            values.matches(&self.value, &other.value)
        } else {
            self.key.is_optional() || other.key.is_optional()
        }
    }
}

/// One key with its ordered values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyToValues {
    pub name: NottableValue,
    pub values: Vec<NottableValue>,
}

/// Ordered mapping from key to one or more values.
///
/// Key order is preserved for serialization but irrelevant to matching.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct MultiValueMap {
    entries: Vec<KeyToValues>,
    key_match_style: KeyMatchStyle,
}

impl MultiValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_style(mut self, style: KeyMatchStyle) -> Self {
        self.key_match_style = style;
        self
    }

    pub fn key_match_style(&self) -> KeyMatchStyle {
        self.key_match_style
    }

    /// Builder form of [`MultiValueMap::insert`].
    pub fn with_entry(
        mut self,
        key: impl Into<NottableValue>,
        value: impl Into<NottableValue>,
    ) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder that adds a key with several values at once.
    pub fn with_values<V: Into<NottableValue>>(
        mut self,
        key: impl Into<NottableValue>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let key = key.into();
        let values: Vec<NottableValue> = values.into_iter().map(Into::into).collect();
        match self.entries.iter_mut().find(|e| e.name == key) {
            Some(existing) => existing.values.extend(values),
            None => self.entries.push(KeyToValues { name: key, values }),
        }
        self
    }

    /// Append a value; values for an identical key accumulate under that key.
    pub fn insert(&mut self, key: impl Into<NottableValue>, value: impl Into<NottableValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|e| e.name == key) {
            Some(existing) => existing.values.push(value),
            None => self.entries.push(KeyToValues {
                name: key,
                values: vec![value],
            }),
        }
    }

    /// Remove every entry whose key equals `name` (case-insensitive).
    pub fn remove(&mut self, name: &str) {
        self.entries
            .retain(|e| !e.name.value().eq_ignore_ascii_case(name));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyToValues> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &NottableValue> {
        self.entries.iter().map(|e| &e.name)
    }

    /// All values for a key, comparing key names literally.
    pub fn get_all(&self, name: &str, ignore_case: bool) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| {
                if ignore_case {
                    e.name.value().eq_ignore_ascii_case(name)
                } else {
                    e.name.value() == name
                }
            })
            .flat_map(|e| e.values.iter().map(NottableValue::value))
            .collect()
    }

    pub fn get_first(&self, name: &str, ignore_case: bool) -> Option<&str> {
        self.get_all(name, ignore_case).into_iter().next()
    }

    pub fn contains_key(&self, name: &str, ignore_case: bool) -> bool {
        self.get_first(name, ignore_case).is_some()
    }

    /// Flatten into independent key/value entries.
    ///
    /// A key without values yields a single entry with an empty value.
    pub fn entries(&self) -> Vec<MultiValueEntry> {
        let mut entries = Vec::new();
        for kv in &self.entries {
            if kv.values.is_empty() {
                entries.push(MultiValueEntry {
                    key: kv.name.clone(),
                    value: NottableValue::new(""),
                });
            }
            for value in &kv.values {
                entries.push(MultiValueEntry {
                    key: kv.name.clone(),
                    value: value.clone(),
                });
            }
        }
        entries
    }

    /// Flatten a pattern collection; a key without values accepts any value.
    fn pattern_entries(&self) -> Vec<MultiValueEntry> {
        let mut entries = Vec::new();
        for kv in &self.entries {
            if kv.values.is_empty() {
                entries.push(MultiValueEntry {
                    key: kv.name.clone(),
                    value: NottableValue::new(".*"),
                });
            }
            for value in &kv.values {
                entries.push(MultiValueEntry {
                    key: kv.name.clone(),
                    value: value.clone(),
                });
            }
        }
        entries
    }

    /// Whether this (actual) collection contains everything `pattern` requires,
    /// using the pattern's own key-match style.
    pub fn contains_all(&self, pattern: &MultiValueMap, matcher: &SubsetMatcher) -> bool {
        matcher.check(self, pattern, pattern.key_match_style).is_ok()
    }
}

impl FromIterator<(String, String)> for MultiValueMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = MultiValueMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Containment algorithms over multi-value collections.
///
/// Keys and values carry separate matchers because header names compare
/// case-insensitively while their values do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsetMatcher {
    pub keys: RegexStringMatcher,
    pub values: RegexStringMatcher,
}

impl SubsetMatcher {
    pub const CASE_SENSITIVE: Self = Self {
        keys: RegexStringMatcher::CASE_SENSITIVE,
        values: RegexStringMatcher::CASE_SENSITIVE,
    };

    /// Case-insensitive keys, case-sensitive values (HTTP headers).
    pub const HEADERS: Self = Self {
        keys: RegexStringMatcher::IGNORE_CASE,
        values: RegexStringMatcher::CASE_SENSITIVE,
    };

    /// Check containment, returning a description of the first failure.
    pub fn check(
        &self,
        actual: &MultiValueMap,
        pattern: &MultiValueMap,
        style: KeyMatchStyle,
    ) -> Result<(), String> {
        if pattern.is_empty() {
            return Ok(());
        }
        match style {
            KeyMatchStyle::SubSet => {
                self.check_subset(&actual.entries(), &pattern.pattern_entries())
            }
            KeyMatchStyle::MatchingKey => self.check_matching_key(actual, pattern),
        }
    }

    fn check_subset(
        &self,
        actual: &[MultiValueEntry],
        pattern: &[MultiValueEntry],
    ) -> Result<(), String> {
        let mut matched_indexes = BTreeSet::new();
        let mut required = 0usize;

        for entry in pattern {
            // Negative-key collision is decided before the optional fallback
            if self.notted_and_present(entry, actual) {
                return Err(format!(
                    "key {} must not be present",
                    entry.key.un_notted()
                ));
            }

            let indexes = self.matching_indexes(entry, actual);
            if entry.key.is_not() {
                // Absence already confirmed above; a negated key consumes nothing
                continue;
            }
            if indexes.is_empty() {
                if entry.key.is_optional() && !self.contains_key(entry, actual) {
                    continue;
                }
                return Err(format!(
                    "no entry matched {}: {}",
                    entry.key, entry.value
                ));
            }
            if !entry.key.is_optional() {
                required += 1;
            }
            matched_indexes.extend(indexes);
        }

        if matched_indexes.len() < required {
            return Err(format!(
                "{required} entries required but only {} distinct entries matched",
                matched_indexes.len()
            ));
        }
        Ok(())
    }

    fn check_matching_key(
        &self,
        actual: &MultiValueMap,
        pattern: &MultiValueMap,
    ) -> Result<(), String> {
        let actual_entries = actual.entries();
        for group in pattern.iter() {
            let key = group.name.un_notted();
            let values: Vec<&NottableValue> = actual_entries
                .iter()
                .filter(|e| !e.key.is_not() && self.keys.matches(&key, &e.key))
                .map(|e| &e.value)
                .collect();

            if group.name.is_not() {
                if values.is_empty() {
                    continue;
                }
                return Err(format!("key {key} must not be present"));
            }
            if values.is_empty() {
                if group.name.is_optional() {
                    continue;
                }
                return Err(format!("key {} not present", group.name));
            }
            if group.values.is_empty() {
                continue;
            }
            for value in values {
                if !group
                    .values
                    .iter()
                    .any(|expected| self.values.matches(expected, value))
                {
                    return Err(format!(
                        "value {value} for key {} matched none of {:?}",
                        group.name, group.values
                    ));
                }
            }
        }
        Ok(())
    }

    fn matching_indexes(&self, entry: &MultiValueEntry, actual: &[MultiValueEntry]) -> Vec<usize> {
        actual
            .iter()
            .enumerate()
            .filter(|(_, candidate)| {
                self.keys.matches(&entry.key, &candidate.key)
                    && self.values.matches(&entry.value, &candidate.value)
            })
            .map(|(index, _)| index)
            .collect()
    }

    fn contains_key(&self, entry: &MultiValueEntry, actual: &[MultiValueEntry]) -> bool {
        let key = entry.key.un_notted();
        actual.iter().any(|e| self.keys.matches(&key, &e.key))
    }

    fn notted_and_present(&self, entry: &MultiValueEntry, actual: &[MultiValueEntry]) -> bool {
        if !entry.key.is_not() {
            return false;
        }
        let key = entry.key.un_notted();
        actual
            .iter()
            .any(|e| !e.key.is_not() && self.keys.matches(&key, &e.key))
    }
}

const KEY_MATCH_STYLE_FIELD: &str = "keyMatchStyle";

impl TryFrom<Value> for MultiValueMap {
    type Error = String;

    /// Accepts `{"name": ["v1", "v2"], "other": "v"}` (optionally with a
    /// `keyMatchStyle` member) or `[{"name": "n", "values": ["v"]}]`.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let mut map = MultiValueMap::new();
        match value {
            Value::Null => {}
            Value::Object(object) => {
                for (name, values) in object {
                    if name == KEY_MATCH_STYLE_FIELD {
                        if let Value::String(_) = values {
                            map.key_match_style = serde_json::from_value(values)
                                .map_err(|e| format!("invalid keyMatchStyle: {e}"))?;
                            continue;
                        }
                    }
                    let values = parse_values(values)?;
                    map = map.with_values(NottableValue::parse(&name), values);
                }
            }
            Value::Array(items) => {
                for item in items {
                    let Value::Object(mut object) = item else {
                        return Err("expected {\"name\", \"values\"} objects".to_string());
                    };
                    let name: NottableValue = object
                        .remove("name")
                        .ok_or_else(|| "entry is missing \"name\"".to_string())
                        .and_then(|n| serde_json::from_value(n).map_err(|e| e.to_string()))?;
                    let values = match object.remove("values").or_else(|| object.remove("value")) {
                        Some(values) => parse_values(values)?,
                        None => Vec::new(),
                    };
                    map = map.with_values(name, values);
                }
            }
            other => return Err(format!("expected an object or array, found {other}")),
        }
        Ok(map)
    }
}

fn parse_values(value: Value) -> Result<Vec<NottableValue>, String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(|e| e.to_string()))
            .collect(),
        Value::Null => Ok(Vec::new()),
        single => Ok(vec![
            serde_json::from_value(single).map_err(|e| e.to_string())?
        ]),
    }
}

impl From<MultiValueMap> for Value {
    fn from(map: MultiValueMap) -> Self {
        let mut object = Map::new();
        for kv in map.entries {
            let values: Vec<Value> = kv
                .values
                .iter()
                .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
                .collect();
            object.insert(kv.name.to_string(), Value::Array(values));
        }
        if map.key_match_style == KeyMatchStyle::MatchingKey {
            object.insert(
                KEY_MATCH_STYLE_FIELD.to_string(),
                Value::String("MATCHING_KEY".to_string()),
            );
        }
        Value::Object(object)
    }
}
