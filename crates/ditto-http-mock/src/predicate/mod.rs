//! Request matching.
//!
//! Matching is built bottom-up:
//!
//! - `nottable` - values that may be negated or optional
//! - `string_matcher` - regex-or-literal comparison of two values
//! - `multi_value` - headers/cookies/parameters and their containment rules
//! - `path` - literal, regex and `{name}` template paths
//! - `body_matcher` - typed body matchers (text, JSON, XML, schema, binary)
//! - `request` - the composed request matcher and its diagnostics

mod body_matcher;
mod difference;
mod json;
mod multi_value;
mod nottable;
mod path;
mod request;
mod string_matcher;
mod xml;
mod xml_schema;

pub use body_matcher::{body_pattern_to_value, BodyMatcher, BodyPattern, CompiledBodyMatcher};
pub use difference::{MatchDifference, MatchField};
pub use json::{json_matches, MatchType};
pub use multi_value::{KeyMatchStyle, KeyToValues, MultiValueEntry, MultiValueMap, SubsetMatcher};
pub use nottable::NottableValue;
pub use path::CompiledPathMatch;
pub use request::{CertificatePattern, RequestMatcher, RequestPattern, SocketAddressPattern};
pub use string_matcher::RegexStringMatcher;
pub use xml_schema::XmlSchema;

use thiserror::Error;

/// Errors raised while compiling a matcher definition.
///
/// Matching itself never fails; malformed request data simply does not match.
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("invalid JSON schema: {0}")]
    InvalidJsonSchema(String),

    #[error("invalid JSONPath expression: {0}")]
    InvalidJsonPath(String),

    #[error("invalid XML: {0}")]
    InvalidXml(String),

    #[error("invalid XML schema: {0}")]
    InvalidXmlSchema(String),

    #[error("invalid XPath expression: {0}")]
    InvalidXPath(String),

    #[error("invalid base64 body: {0}")]
    InvalidBinary(#[from] base64::DecodeError),
}
