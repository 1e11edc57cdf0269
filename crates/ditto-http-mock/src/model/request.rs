//! The request value matched against expectations.
//!
//! The transport layer converts wire requests into [`HttpRequest`]; tests
//! build them directly with the `with_*` methods.

use crate::predicate::MultiValueMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

// ============================================================================
// Connection metadata
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "HTTP_1_1")]
    Http11,
    #[serde(rename = "HTTP_2")]
    Http2,
}

/// Address the request was received on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketAddress {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub scheme: Scheme,
}

/// TLS client certificate details presented by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    #[serde(default)]
    pub issuer_distinguished_name: String,
    #[serde(default)]
    pub subject_distinguished_name: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub signature_algorithm_name: String,
}

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub query_string_parameters: MultiValueMap,
    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub headers: MultiValueMap,
    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub cookies: MultiValueMap,
    #[serde(
        default,
        skip_serializing_if = "Bytes::is_empty",
        serialize_with = "serialize_body",
        deserialize_with = "deserialize_body"
    )]
    pub body: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_address: Option<SocketAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client_certificate_chain: Vec<Certificate>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    /// Adds a header; a `Cookie` header is also split into cookies.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if name.eq_ignore_ascii_case("cookie") {
            for (k, v) in parse_cookie_header(&value) {
                self.cookies.insert(k, v);
            }
        }
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value): (String, String) = (name.into(), value.into());
        self.query_string_parameters.insert(name, value);
        self
    }

    /// Replace the query parameters with those parsed from a raw query string.
    pub fn with_query_string(mut self, query: &str) -> Self {
        self.query_string_parameters = parse_query_string(query);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value): (String, String) = (name.into(), value.into());
        self.cookies.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    pub fn with_socket_address(mut self, host: impl Into<String>, port: u16, scheme: Scheme) -> Self {
        self.socket_address = Some(SocketAddress {
            host: host.into(),
            port,
            scheme,
        });
        self
    }

    pub fn with_certificate(mut self, certificate: Certificate) -> Self {
        self.client_certificate_chain.push(certificate);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_first(name, true)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Path plus the re-encoded query string.
    pub fn path_and_query(&self) -> String {
        let mut pairs = Vec::new();
        for kv in self.query_string_parameters.iter() {
            for value in &kv.values {
                pairs.push(format!(
                    "{}={}",
                    urlencoding::encode(kv.name.value()),
                    urlencoding::encode(value.value())
                ));
            }
        }
        if pairs.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, pairs.join("&"))
        }
    }
}

/// Parse `a=1&b=2&a=3` into a multi-value map, percent-decoding both sides.
pub fn parse_query_string(query: &str) -> MultiValueMap {
    let mut map = MultiValueMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        map.insert(decode_component(key), decode_component(value));
    }
    map
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Split a `Cookie` header into name/value pairs.
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let (name, value) = part.split_once('=').unwrap_or((part, ""));
            Some((name.trim().to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

fn serialize_body<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    match std::str::from_utf8(body) {
        Ok(text) => serializer.serialize_str(text),
        Err(_) => json!({"type": "BINARY", "base64Bytes": BASE64.encode(body)}).serialize(serializer),
    }
}

fn deserialize_body<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    use serde::de::Error;
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Bytes::new()),
        Value::String(s) => Ok(Bytes::from(s)),
        Value::Object(o) if o.get("type").and_then(Value::as_str) == Some("BINARY") => {
            let encoded = o.get("base64Bytes").and_then(Value::as_str).unwrap_or_default();
            BASE64
                .decode(encoded)
                .map(Bytes::from)
                .map_err(|e| D::Error::custom(format!("invalid base64 body: {e}")))
        }
        Value::Object(o) if o.get("type").and_then(Value::as_str) == Some("STRING") => Ok(Bytes::from(
            o.get("string").and_then(Value::as_str).unwrap_or_default().to_string(),
        )),
        other => Ok(Bytes::from(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_cookie_header() {
        let req = HttpRequest::get("/a")
            .with_header("Cookie", "session=abc; theme=\"dark\"")
            .with_header("Content-Type", "text/plain")
            .with_query("q", "x y");
        assert_eq!(req.cookies.get_first("session", false), Some("abc"));
        assert_eq!(req.cookies.get_first("theme", false), Some("dark"));
        assert_eq!(req.content_type(), Some("text/plain"));
        assert_eq!(req.path_and_query(), "/a?q=x%20y");
    }

    #[test]
    fn test_parse_query_string() {
        let map = parse_query_string("a=1&b=two+words&a=%2F&flag");
        assert_eq!(map.get_all("a", false), vec!["1", "/"]);
        assert_eq!(map.get_first("b", false), Some("two words"));
        assert_eq!(map.get_first("flag", false), Some(""));
        assert!(parse_query_string("").is_empty());
    }

    #[test]
    fn test_body_serde() {
        let req = HttpRequest::post("/").with_body("hello");
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["body"], "hello");

        let binary = HttpRequest::post("/").with_body(vec![0xff, 0xfe]);
        let v = serde_json::to_value(&binary).unwrap();
        assert_eq!(v["body"]["type"], "BINARY");
        let back: HttpRequest = serde_json::from_value(v).unwrap();
        assert_eq!(back.body.as_ref(), &[0xff, 0xfe]);
    }
}
