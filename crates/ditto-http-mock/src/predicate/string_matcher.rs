//! Regex-or-literal string matching with negation.
//!
//! `RegexStringMatcher` is the single place that decides whether two
//! `NottableValue`s match. Every collection and request field matcher routes
//! its string comparisons through it.

use super::nottable::NottableValue;

/// Matches a pattern value against an actual value.
///
/// Matching rules, applied to the un-negated values:
/// 1. An empty pattern matches only an empty value.
/// 2. Identical strings always match (this also covers patterns that are not
///    valid regular expressions).
/// 3. Otherwise the pattern is compiled as an anchored regex; a pattern that
///    fails to compile falls back to literal comparison.
///
/// The result is inverted when exactly one side is negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegexStringMatcher {
    ignore_case: bool,
}

impl RegexStringMatcher {
    pub const CASE_SENSITIVE: Self = Self { ignore_case: false };
    pub const IGNORE_CASE: Self = Self { ignore_case: true };

    pub fn new(ignore_case: bool) -> Self {
        Self { ignore_case }
    }

    pub fn ignores_case(&self) -> bool {
        self.ignore_case
    }

    /// Match `matcher` (the configured pattern) against `matched` (the actual value).
    pub fn matches(&self, matcher: &NottableValue, matched: &NottableValue) -> bool {
        let result = self.matches_str(matcher, matched.value());
        if matcher.is_not() != matched.is_not() {
            !result
        } else {
            result
        }
    }

    /// Match a pattern against a plain (never negated) actual string.
    pub fn matches_value(&self, matcher: &NottableValue, matched: &str) -> bool {
        let result = self.matches_str(matcher, matched);
        if matcher.is_not() {
            !result
        } else {
            result
        }
    }

    fn matches_str(&self, matcher: &NottableValue, matched: &str) -> bool {
        let pattern = matcher.value();
        if pattern.is_empty() {
            return matched.is_empty();
        }
        if pattern == matched {
            return true;
        }
        if self.ignore_case && pattern.to_lowercase() == matched.to_lowercase() {
            return true;
        }
        match matcher.regex(self.ignore_case) {
            Some(regex) => regex.is_match(matched),
            // Invalid regex degrades to the literal comparisons above
            None => false,
        }
    }
}
