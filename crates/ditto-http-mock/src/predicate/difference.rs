//! Diagnostic trail explaining why a request did not match.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// The request field a sub-matcher inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchField {
    Method,
    Path,
    PathParameters,
    QueryParameters,
    Headers,
    Cookies,
    Body,
    SocketAddress,
    Protocol,
    KeepAlive,
    Secure,
    ClientCertificateChain,
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchField::Method => "method",
            MatchField::Path => "path",
            MatchField::PathParameters => "pathParameters",
            MatchField::QueryParameters => "queryStringParameters",
            MatchField::Headers => "headers",
            MatchField::Cookies => "cookies",
            MatchField::Body => "body",
            MatchField::SocketAddress => "socketAddress",
            MatchField::Protocol => "protocol",
            MatchField::KeepAlive => "keepAlive",
            MatchField::Secure => "secure",
            MatchField::ClientCertificateChain => "clientCertificateChain",
        };
        f.write_str(name)
    }
}

/// Accumulates per-field mismatch descriptions.
///
/// When a `MatchDifference` is supplied to a matcher every sub-matcher is
/// evaluated, so the trail lists every failing field rather than only the
/// first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchDifference {
    differences: BTreeMap<MatchField, Vec<String>>,
}

impl MatchDifference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: MatchField, message: impl Into<String>) {
        self.differences
            .entry(field)
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = MatchField> + '_ {
        self.differences.keys().copied()
    }

    pub fn get(&self, field: MatchField) -> &[String] {
        self.differences
            .get(&field)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.differences.clear();
    }
}

impl fmt::Display for MatchDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.differences {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                first = false;
                write!(f, "{field} didn't match: {message}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difference_accumulates_in_field_order() {
        let mut diff = MatchDifference::new();
        assert!(diff.is_empty());
        diff.add(MatchField::Body, "not json");
        diff.add(MatchField::Method, "GET != POST");
        diff.add(MatchField::Body, "second");

        let fields: Vec<_> = diff.fields().collect();
        assert_eq!(fields, vec![MatchField::Method, MatchField::Body]);
        assert_eq!(diff.get(MatchField::Body).len(), 2);
        assert!(diff.get(MatchField::Path).is_empty());
        assert_eq!(
            diff.to_string(),
            "method didn't match: GET != POST; body didn't match: not json; body didn't match: second"
        );
    }
}
