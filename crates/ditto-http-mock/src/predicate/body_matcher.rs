//! Body matching configuration and compilation.
//!
//! The matcher kind is fixed when the expectation is created; schemas,
//! JSONPath expressions and binary payloads are parsed once at compile time.

use super::json::{json_matches, MatchType};
use super::multi_value::{KeyMatchStyle, MultiValueMap, SubsetMatcher};
use super::nottable::NottableValue;
use super::string_matcher::RegexStringMatcher;
use super::xml::{validate_xpath, xpath_matches, XmlNode};
use super::xml_schema::XmlSchema;
use super::MatcherError;
use crate::model::parse_query_string;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_json_path::JsonPath;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Body matching configuration, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BodyMatcher {
    /// Exact text, or substring when `subString` is set
    String {
        string: String,
        #[serde(default, rename = "subString", skip_serializing_if = "std::ops::Not::not")]
        sub_string: bool,
    },
    Regex {
        regex: String,
    },
    Json {
        json: Value,
        #[serde(default, rename = "matchType")]
        match_type: MatchType,
    },
    JsonSchema {
        #[serde(rename = "jsonSchema")]
        json_schema: Value,
    },
    JsonPath {
        #[serde(rename = "jsonPath")]
        json_path: String,
    },
    Xml {
        xml: String,
    },
    XmlSchema {
        #[serde(rename = "xmlSchema")]
        xml_schema: String,
    },
    #[serde(rename = "XPATH")]
    XPath {
        xpath: String,
        #[serde(
            default,
            rename = "namespacePrefixes",
            skip_serializing_if = "BTreeMap::is_empty"
        )]
        namespace_prefixes: BTreeMap<String, String>,
    },
    Binary {
        #[serde(rename = "base64Bytes")]
        base64_bytes: String,
    },
    Parameters {
        parameters: MultiValueMap,
    },
}

impl BodyMatcher {
    /// A concrete body equivalent to this matcher, where one exists.
    pub fn representative_bytes(&self) -> Option<Vec<u8>> {
        match self {
            BodyMatcher::String { string, .. } => Some(string.as_bytes().to_vec()),
            BodyMatcher::Json { json, .. } => Some(json.to_string().into_bytes()),
            BodyMatcher::Xml { xml } => Some(xml.as_bytes().to_vec()),
            BodyMatcher::Binary { base64_bytes } => BASE64.decode(base64_bytes).ok(),
            _ => None,
        }
    }
}

/// A body matcher with an optional negation.
///
/// Deserializes from a tagged object, a bare string (exact text) or any other
/// JSON object/array (lenient JSON match).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct BodyPattern {
    #[serde(flatten)]
    pub matcher: BodyMatcher,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not: bool,
}

impl BodyPattern {
    pub fn new(matcher: BodyMatcher) -> Self {
        Self { matcher, not: false }
    }

    pub fn negated(matcher: BodyMatcher) -> Self {
        Self { matcher, not: true }
    }

    pub fn exact(text: impl Into<String>) -> Self {
        Self::new(BodyMatcher::String {
            string: text.into(),
            sub_string: false,
        })
    }

    pub fn json(json: Value, match_type: MatchType) -> Self {
        Self::new(BodyMatcher::Json { json, match_type })
    }
}

impl TryFrom<Value> for BodyPattern {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(text) => Ok(BodyPattern::exact(text)),
            Value::Object(mut object) if object.get("type").is_some_and(Value::is_string) => {
                let not = match object.remove("not") {
                    Some(Value::Bool(b)) => b,
                    Some(Value::Null) | None => false,
                    Some(other) => return Err(format!("invalid body \"not\" flag: {other}")),
                };
                let matcher = serde_json::from_value(Value::Object(object))
                    .map_err(|e| format!("invalid body matcher: {e}"))?;
                Ok(BodyPattern { matcher, not })
            }
            json @ (Value::Object(_) | Value::Array(_)) => {
                Ok(BodyPattern::json(json, MatchType::OnlyMatchingFields))
            }
            other => Err(format!("unsupported body matcher {other}")),
        }
    }
}

enum CompiledBody {
    String { expected: String, sub_string: bool },
    Regex(NottableValue),
    Json { expected: Value, match_type: MatchType },
    JsonSchema(Arc<jsonschema::Validator>),
    JsonPath(JsonPath),
    Xml(XmlNode),
    XmlSchema(Arc<XmlSchema>),
    XPath {
        expression: String,
        namespaces: BTreeMap<String, String>,
    },
    Binary(Vec<u8>),
    Parameters(MultiValueMap),
}

/// Compiled body matcher for efficient runtime evaluation.
pub struct CompiledBodyMatcher {
    body: CompiledBody,
    not: bool,
}

impl fmt::Debug for CompiledBodyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.body {
            CompiledBody::String { .. } => "String",
            CompiledBody::Regex(_) => "Regex",
            CompiledBody::Json { .. } => "Json",
            CompiledBody::JsonSchema(_) => "JsonSchema",
            CompiledBody::JsonPath(_) => "JsonPath",
            CompiledBody::Xml(_) => "Xml",
            CompiledBody::XmlSchema(_) => "XmlSchema",
            CompiledBody::XPath { .. } => "XPath",
            CompiledBody::Binary(_) => "Binary",
            CompiledBody::Parameters(_) => "Parameters",
        };
        f.debug_struct("CompiledBodyMatcher")
            .field("kind", &kind)
            .field("not", &self.not)
            .finish()
    }
}

impl CompiledBodyMatcher {
    /// Compile a body pattern, rejecting schemas and expressions that cannot be built.
    pub fn compile(pattern: &BodyPattern) -> Result<Self, MatcherError> {
        let body = match &pattern.matcher {
            BodyMatcher::String { string, sub_string } => CompiledBody::String {
                expected: string.clone(),
                sub_string: *sub_string,
            },
            BodyMatcher::Regex { regex } => CompiledBody::Regex(NottableValue::new(regex.as_str())),
            BodyMatcher::Json { json, match_type } => CompiledBody::Json {
                expected: json.clone(),
                match_type: *match_type,
            },
            BodyMatcher::JsonSchema { json_schema } => {
                let schema = match json_schema {
                    Value::String(raw) => serde_json::from_str(raw)
                        .map_err(|e| MatcherError::InvalidJsonSchema(e.to_string()))?,
                    other => other.clone(),
                };
                let validator = jsonschema::draft7::new(&schema)
                    .map_err(|e| MatcherError::InvalidJsonSchema(e.to_string()))?;
                CompiledBody::JsonSchema(Arc::new(validator))
            }
            BodyMatcher::JsonPath { json_path } => CompiledBody::JsonPath(
                JsonPath::parse(json_path)
                    .map_err(|e| MatcherError::InvalidJsonPath(e.to_string()))?,
            ),
            BodyMatcher::Xml { xml } => CompiledBody::Xml(
                XmlNode::parse(xml).ok_or_else(|| MatcherError::InvalidXml(xml.clone()))?,
            ),
            BodyMatcher::XmlSchema { xml_schema } => CompiledBody::XmlSchema(Arc::new(
                XmlSchema::parse(xml_schema).map_err(MatcherError::InvalidXmlSchema)?,
            )),
            BodyMatcher::XPath {
                xpath,
                namespace_prefixes,
            } => {
                validate_xpath(xpath).map_err(MatcherError::InvalidXPath)?;
                CompiledBody::XPath {
                    expression: xpath.clone(),
                    namespaces: namespace_prefixes.clone(),
                }
            }
            BodyMatcher::Binary { base64_bytes } => CompiledBody::Binary(BASE64.decode(base64_bytes)?),
            BodyMatcher::Parameters { parameters } => CompiledBody::Parameters(parameters.clone()),
        };
        Ok(Self {
            body,
            not: pattern.not,
        })
    }

    /// Check if a raw body matches, honouring negation.
    pub fn matches(&self, body: &[u8]) -> bool {
        self.matches_raw(body) != self.not
    }

    fn matches_raw(&self, body: &[u8]) -> bool {
        match &self.body {
            CompiledBody::Binary(expected) => expected.as_slice() == body,
            CompiledBody::String {
                expected,
                sub_string,
            } => {
                let text = String::from_utf8_lossy(body);
                if *sub_string {
                    text.contains(expected.as_str())
                } else {
                    text == expected.as_str()
                }
            }
            CompiledBody::Regex(pattern) => RegexStringMatcher::CASE_SENSITIVE
                .matches_value(pattern, &String::from_utf8_lossy(body)),
            CompiledBody::Json {
                expected,
                match_type,
            } => match serde_json::from_slice::<Value>(body) {
                Ok(actual) => json_matches(expected, &actual, *match_type),
                Err(_) => false,
            },
            CompiledBody::JsonSchema(validator) => match serde_json::from_slice::<Value>(body) {
                Ok(actual) => validator.is_valid(&actual),
                Err(_) => false,
            },
            CompiledBody::JsonPath(path) => match serde_json::from_slice::<Value>(body) {
                Ok(actual) => !path.query(&actual).is_empty(),
                Err(_) => false,
            },
            CompiledBody::Xml(expected) => match std::str::from_utf8(body) {
                Ok(text) => XmlNode::parse(text).as_ref() == Some(expected),
                Err(_) => false,
            },
            CompiledBody::XmlSchema(schema) => match std::str::from_utf8(body) {
                Ok(text) => schema.validate(text).is_ok(),
                Err(_) => false,
            },
            CompiledBody::XPath {
                expression,
                namespaces,
            } => match std::str::from_utf8(body) {
                Ok(text) => xpath_matches(text, expression, namespaces),
                Err(_) => false,
            },
            CompiledBody::Parameters(expected) => {
                let actual = parse_query_string(&String::from_utf8_lossy(body));
                SubsetMatcher::CASE_SENSITIVE
                    .check(&actual, expected, KeyMatchStyle::SubSet)
                    .is_ok()
            }
        }
    }
}

/// Render a body pattern as its JSON configuration form.
pub fn body_pattern_to_value(pattern: &BodyPattern) -> Value {
    serde_json::to_value(pattern).unwrap_or_else(|_| Value::Object(Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(value: Value) -> CompiledBodyMatcher {
        let pattern: BodyPattern = serde_json::from_value(value).unwrap();
        CompiledBodyMatcher::compile(&pattern).unwrap()
    }

    #[test]
    fn test_plain_string_is_exact_match() {
        let m = compile(json!("hello"));
        assert!(m.matches(b"hello"));
        assert!(!m.matches(b"hello world"));

        let sub = compile(json!({"type": "STRING", "string": "lo w", "subString": true}));
        assert!(sub.matches(b"hello world"));
    }

    #[test]
    fn test_regex_body_is_anchored() {
        let m = compile(json!({"type": "REGEX", "regex": "id=[0-9]+"}));
        assert!(m.matches(b"id=42"));
        assert!(!m.matches(b"x id=42"));
    }

    #[test]
    fn test_json_body_defaults_to_lenient() {
        let m = compile(json!({"name": "ann"}));
        assert!(m.matches(br#"{"name":"ann","age":3}"#));
        assert!(!m.matches(b"not json"));

        let strict = compile(json!({"type": "JSON", "json": {"name": "ann"}, "matchType": "STRICT"}));
        assert!(!strict.matches(br#"{"name":"ann","age":3}"#));
        assert!(strict.matches(br#"{"name":"ann"}"#));
    }

    #[test]
    fn test_negated_body() {
        let m = compile(json!({"type": "STRING", "string": "a", "not": true}));
        assert!(!m.matches(b"a"));
        assert!(m.matches(b"b"));
    }

    #[test]
    fn test_json_schema() {
        let m = compile(json!({"type": "JSON_SCHEMA", "jsonSchema": {
            "type": "object",
            "properties": {"id": {"type": "integer"}},
            "required": ["id"]
        }}));
        assert!(m.matches(br#"{"id": 4}"#));
        assert!(!m.matches(br#"{"id": "4"}"#));
        assert!(!m.matches(b"<xml/>"));

        let invalid: BodyPattern =
            serde_json::from_value(json!({"type": "JSON_SCHEMA", "jsonSchema": {"type": 12}})).unwrap();
        assert!(CompiledBodyMatcher::compile(&invalid).is_err());
    }

    #[test]
    fn test_json_path() {
        let m = compile(json!({"type": "JSON_PATH", "jsonPath": "$.items[?@.price > 10]"}));
        assert!(m.matches(br#"{"items": [{"price": 5}, {"price": 12}]}"#));
        assert!(!m.matches(br#"{"items": [{"price": 5}]}"#));

        let bad: BodyPattern =
            serde_json::from_value(json!({"type": "JSON_PATH", "jsonPath": "$[["})).unwrap();
        assert!(matches!(
            CompiledBodyMatcher::compile(&bad),
            Err(MatcherError::InvalidJsonPath(_))
        ));
    }

    #[test]
    fn test_xml_and_xpath() {
        let xml = compile(json!({"type": "XML", "xml": "<a><b>1</b></a>"}));
        assert!(xml.matches(b"<a>\n  <b>1</b>\n</a>"));
        assert!(!xml.matches(b"<a><b>2</b></a>"));
        assert!(!xml.matches(b"<a>"));

        let xpath = compile(json!({"type": "XPATH", "xpath": "/a/b[text()='1']"}));
        assert!(xpath.matches(b"<a><b>1</b></a>"));
        assert!(!xpath.matches(b"<a><b>2</b></a>"));
    }

    #[test]
    fn test_binary_and_parameters() {
        let bin = compile(json!({"type": "BINARY", "base64Bytes": "AAEC"}));
        assert!(bin.matches(&[0, 1, 2]));
        assert!(!bin.matches(&[0, 1]));

        let params = compile(json!({"type": "PARAMETERS", "parameters": {"name": ["ann"]}}));
        assert!(params.matches(b"name=ann&age=3"));
        assert!(!params.matches(b"name=bob"));

        let bad: BodyPattern =
            serde_json::from_value(json!({"type": "BINARY", "base64Bytes": "***"})).unwrap();
        assert!(CompiledBodyMatcher::compile(&bad).is_err());
    }

    #[test]
    fn test_serialization_keeps_type_tag() {
        let pattern = BodyPattern::negated(BodyMatcher::Regex { regex: "x.*".into() });
        let v = body_pattern_to_value(&pattern);
        assert_eq!(v, json!({"type": "REGEX", "regex": "x.*", "not": true}));
    }
}
