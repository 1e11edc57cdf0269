//! Request patterns and the compiled matcher that evaluates them.

use super::body_matcher::{BodyPattern, CompiledBodyMatcher};
use super::difference::{MatchDifference, MatchField};
use super::multi_value::{KeyMatchStyle, MultiValueMap, SubsetMatcher};
use super::nottable::NottableValue;
use super::path::CompiledPathMatch;
use super::string_matcher::RegexStringMatcher;
use super::MatcherError;
use crate::model::{Certificate, HttpRequest, Protocol, Scheme};
use serde::{Deserialize, Serialize};

/// Constraint on the address the request arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketAddressPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<NottableValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<Scheme>,
}

/// Constraint on one certificate of the client chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificatePattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_distinguished_name: Option<NottableValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_distinguished_name: Option<NottableValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<NottableValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_algorithm_name: Option<NottableValue>,
}

impl CertificatePattern {
    fn matches(&self, cert: &Certificate) -> bool {
        let m = RegexStringMatcher::CASE_SENSITIVE;
        let field = |pattern: &Option<NottableValue>, actual: &str| {
            pattern.as_ref().map_or(true, |p| m.matches_value(p, actual))
        };
        field(&self.issuer_distinguished_name, &cert.issuer_distinguished_name)
            && field(&self.subject_distinguished_name, &cert.subject_distinguished_name)
            && field(&self.serial_number, &cert.serial_number)
            && field(&self.signature_algorithm_name, &cert.signature_algorithm_name)
    }
}

/// Request pattern configuration. Every field is optional; an unset field
/// places no constraint on the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPattern {
    /// Invert the aggregate result
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<NottableValue>,

    /// Literal, regex or `{name}` template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<NottableValue>,

    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub path_parameters: MultiValueMap,

    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub query_string_parameters: MultiValueMap,

    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub headers: MultiValueMap,

    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub cookies: MultiValueMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyPattern>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_address: Option<SocketAddressPattern>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client_certificate_chain: Vec<CertificatePattern>,
}

impl RequestPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: impl Into<NottableValue>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<NottableValue>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_header(
        mut self,
        name: impl Into<NottableValue>,
        value: impl Into<NottableValue>,
    ) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(
        mut self,
        name: impl Into<NottableValue>,
        value: impl Into<NottableValue>,
    ) -> Self {
        self.query_string_parameters.insert(name, value);
        self
    }

    pub fn with_cookie(
        mut self,
        name: impl Into<NottableValue>,
        value: impl Into<NottableValue>,
    ) -> Self {
        self.cookies.insert(name, value);
        self
    }

    pub fn with_path_parameter(
        mut self,
        name: impl Into<NottableValue>,
        value: impl Into<NottableValue>,
    ) -> Self {
        self.path_parameters.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: BodyPattern) -> Self {
        self.body = Some(body);
        self
    }

    pub fn negate(mut self) -> Self {
        self.not = !self.not;
        self
    }
}

/// Evaluation order, cheapest first.
const FIELD_ORDER: [MatchField; 12] = [
    MatchField::Method,
    MatchField::Path,
    MatchField::PathParameters,
    MatchField::Protocol,
    MatchField::KeepAlive,
    MatchField::Secure,
    MatchField::SocketAddress,
    MatchField::QueryParameters,
    MatchField::Headers,
    MatchField::Cookies,
    MatchField::ClientCertificateChain,
    MatchField::Body,
];

/// Compiled request matcher.
///
/// Immutable once built; shared between threads behind an `Arc`.
#[derive(Debug)]
pub struct RequestMatcher {
    pattern: RequestPattern,
    path: Option<CompiledPathMatch>,
    body: Option<CompiledBodyMatcher>,
}

impl RequestMatcher {
    /// Compile a pattern. Fails only for body matchers that cannot be built.
    pub fn compile(pattern: RequestPattern) -> Result<Self, MatcherError> {
        let path = pattern.path.as_ref().map(CompiledPathMatch::compile);
        let body = pattern
            .body
            .as_ref()
            .map(CompiledBodyMatcher::compile)
            .transpose()?;
        Ok(Self {
            pattern,
            path,
            body,
        })
    }

    pub fn pattern(&self) -> &RequestPattern {
        &self.pattern
    }

    /// Evaluate the request.
    ///
    /// Without a context evaluation stops at the first failing field. With a
    /// context every field is evaluated and each failure is recorded.
    pub fn matches(&self, mut context: Option<&mut MatchDifference>, request: &HttpRequest) -> bool {
        let mut matched = true;
        for field in FIELD_ORDER {
            if let Err(reason) = self.check(field, request) {
                matched = false;
                match context.as_deref_mut() {
                    Some(difference) => difference.add(field, reason),
                    None => break,
                }
            }
        }
        matched != self.pattern.not
    }

    fn check(&self, field: MatchField, request: &HttpRequest) -> Result<(), String> {
        let p = &self.pattern;
        match field {
            MatchField::Method => match &p.method {
                Some(method)
                    if !RegexStringMatcher::CASE_SENSITIVE.matches_value(method, &request.method) =>
                {
                    Err(format!("{} does not match {}", request.method, method))
                }
                _ => Ok(()),
            },
            MatchField::Path => match &self.path {
                Some(path) if !path.matches(&request.path) => {
                    Err(format!("{} does not match {}", request.path, path.value()))
                }
                _ => Ok(()),
            },
            MatchField::PathParameters => {
                if p.path_parameters.is_empty() {
                    return Ok(());
                }
                let bound = self
                    .path
                    .as_ref()
                    .and_then(|path| path.extract(&request.path))
                    .unwrap_or_default();
                SubsetMatcher::CASE_SENSITIVE.check(&bound, &p.path_parameters, KeyMatchStyle::MatchingKey)
            }
            MatchField::QueryParameters => SubsetMatcher::CASE_SENSITIVE.check(
                &request.query_string_parameters,
                &p.query_string_parameters,
                p.query_string_parameters.key_match_style(),
            ),
            MatchField::Headers => {
                SubsetMatcher::HEADERS.check(&request.headers, &p.headers, p.headers.key_match_style())
            }
            MatchField::Cookies => {
                SubsetMatcher::CASE_SENSITIVE.check(&request.cookies, &p.cookies, p.cookies.key_match_style())
            }
            MatchField::Body => match &self.body {
                Some(body) if !body.matches(&request.body) => Err("body did not match".to_string()),
                _ => Ok(()),
            },
            MatchField::SocketAddress => match (&p.socket_address, &request.socket_address) {
                (None, _) => Ok(()),
                (Some(_), None) => Err("request has no socket address".to_string()),
                (Some(expected), Some(actual)) => {
                    let host_ok = expected.host.as_ref().map_or(true, |h| {
                        RegexStringMatcher::IGNORE_CASE.matches_value(h, &actual.host)
                    });
                    let port_ok = expected.port.map_or(true, |port| port == actual.port);
                    let scheme_ok = expected.scheme.map_or(true, |s| s == actual.scheme);
                    if host_ok && port_ok && scheme_ok {
                        Ok(())
                    } else {
                        Err(format!("{}:{} does not match", actual.host, actual.port))
                    }
                }
            },
            MatchField::Protocol => match p.protocol {
                Some(expected) if request.protocol != Some(expected) => {
                    Err(format!("{:?} does not match {expected:?}", request.protocol))
                }
                _ => Ok(()),
            },
            MatchField::KeepAlive => match p.keep_alive {
                Some(expected) if request.keep_alive != Some(expected) => {
                    Err(format!("keepAlive {:?} expected {expected}", request.keep_alive))
                }
                _ => Ok(()),
            },
            MatchField::Secure => match p.secure {
                Some(expected) if request.secure.unwrap_or(false) != expected => {
                    Err(format!("secure expected {expected}"))
                }
                _ => Ok(()),
            },
            MatchField::ClientCertificateChain => {
                let missing = p.client_certificate_chain.iter().find(|expected| {
                    !request
                        .client_certificate_chain
                        .iter()
                        .any(|cert| expected.matches(cert))
                });
                match missing {
                    Some(expected) => Err(format!("no certificate matched {expected:?}")),
                    None => Ok(()),
                }
            }
        }
    }

    /// Control-plane matching of this matcher, used as a filter, against a
    /// stored request pattern. Values of the stored pattern are treated as the
    /// actual side, so an identical pattern always matches.
    pub fn matches_definition(&self, other: &RequestPattern) -> bool {
        let filter = &self.pattern;
        if filter == other {
            return true;
        }
        let m = RegexStringMatcher::CASE_SENSITIVE;
        let value_ok = |f: &Option<NottableValue>, o: &Option<NottableValue>| match (f, o) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(f), Some(o)) => f == o || m.matches(f, o),
        };
        let map_ok = |f: &MultiValueMap, o: &MultiValueMap, keys: SubsetMatcher| {
            f.is_empty() || f == o || keys.check(o, f, f.key_match_style()).is_ok()
        };

        let fields_ok = value_ok(&filter.method, &other.method)
            && value_ok(&filter.path, &other.path)
            && map_ok(&filter.path_parameters, &other.path_parameters, SubsetMatcher::CASE_SENSITIVE)
            && map_ok(
                &filter.query_string_parameters,
                &other.query_string_parameters,
                SubsetMatcher::CASE_SENSITIVE,
            )
            && map_ok(&filter.headers, &other.headers, SubsetMatcher::HEADERS)
            && map_ok(&filter.cookies, &other.cookies, SubsetMatcher::CASE_SENSITIVE)
            && filter.protocol.map_or(true, |p| other.protocol == Some(p))
            && filter.keep_alive.map_or(true, |k| other.keep_alive == Some(k))
            && filter.secure.map_or(true, |s| other.secure == Some(s))
            && (filter.socket_address.is_none() || filter.socket_address == other.socket_address)
            && (filter.client_certificate_chain.is_empty()
                || filter.client_certificate_chain == other.client_certificate_chain);

        let body_ok = match (&self.body, &filter.body, &other.body) {
            (None, _, _) => true,
            (Some(_), _, None) => false,
            (Some(compiled), Some(f), Some(o)) => {
                f == o
                    || o.matcher
                        .representative_bytes()
                        .is_some_and(|bytes| compiled.matches(&bytes))
            }
            (Some(_), None, Some(_)) => false,
        };

        (fields_ok && body_ok) != filter.not
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{BodyMatcher, MatchType};
    use serde_json::json;

    fn matcher(pattern: RequestPattern) -> RequestMatcher {
        RequestMatcher::compile(pattern).unwrap()
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        let m = matcher(RequestPattern::new());
        assert!(m.matches(None, &HttpRequest::get("/anything")));
        assert!(m.matches(None, &HttpRequest::post("/").with_body("x")));
    }

    #[test]
    fn test_method_and_path() {
        let m = matcher(RequestPattern::new().with_method("GET").with_path("/hello"));
        assert!(m.matches(None, &HttpRequest::get("/hello")));
        assert!(!m.matches(None, &HttpRequest::post("/hello")));
        assert!(!m.matches(None, &HttpRequest::get("/other")));
        assert!(!m.matches(None, &HttpRequest::new("get", "/hello")));
    }

    #[test]
    fn test_not_inverts_aggregate() {
        let m = matcher(RequestPattern::new().with_method("GET").with_path("/a").negate());
        assert!(!m.matches(None, &HttpRequest::get("/a")));
        assert!(m.matches(None, &HttpRequest::get("/b")));
        assert!(m.matches(None, &HttpRequest::post("/a")));
    }

    #[test]
    fn test_headers_cookies_query() {
        let m = matcher(
            RequestPattern::new()
                .with_header("X-Api-Key", "k[0-9]+")
                .with_cookie("session", "abc")
                .with_query("page", "1"),
        );
        let ok = HttpRequest::get("/")
            .with_header("x-api-key", "k42")
            .with_header("Cookie", "session=abc")
            .with_query("page", "1")
            .with_query("size", "10");
        assert!(m.matches(None, &ok));

        let bad_cookie = HttpRequest::get("/")
            .with_header("x-api-key", "k42")
            .with_cookie("Session", "abc")
            .with_query("page", "1");
        assert!(!m.matches(None, &bad_cookie));
    }

    #[test]
    fn test_path_template_and_parameters() {
        let m = matcher(
            RequestPattern::new()
                .with_path("/users/{id}")
                .with_path_parameter("id", "[0-9]+"),
        );
        assert!(m.matches(None, &HttpRequest::get("/users/17")));
        assert!(!m.matches(None, &HttpRequest::get("/users/ann")));
        assert!(!m.matches(None, &HttpRequest::get("/users/17/x")));
    }

    #[test]
    fn test_query_matching_key_style() {
        let mut pattern = RequestPattern::new();
        pattern.query_string_parameters = MultiValueMap::new()
            .with_values("id", ["1", "2"])
            .with_style(KeyMatchStyle::MatchingKey);
        let m = matcher(pattern);
        assert!(m.matches(None, &HttpRequest::get("/").with_query_string("id=1&id=2")));
        assert!(!m.matches(None, &HttpRequest::get("/").with_query_string("id=1&id=3")));
    }

    #[test]
    fn test_connection_fields() {
        let mut pattern = RequestPattern::new();
        pattern.protocol = Some(Protocol::Http2);
        pattern.secure = Some(false);
        pattern.keep_alive = Some(true);
        pattern.socket_address = Some(SocketAddressPattern {
            host: Some("localhost".into()),
            port: Some(1080),
            scheme: None,
        });
        let m = matcher(pattern);

        let ok = HttpRequest::get("/")
            .with_protocol(Protocol::Http2)
            .with_keep_alive(true)
            .with_socket_address("LOCALHOST", 1080, Scheme::Http);
        assert!(m.matches(None, &ok));
        assert!(!m.matches(None, &ok.clone().with_protocol(Protocol::Http11)));
        assert!(!m.matches(None, &ok.clone().with_secure(true)));
        assert!(!m.matches(None, &HttpRequest::get("/").with_protocol(Protocol::Http2).with_keep_alive(true)));
    }

    #[test]
    fn test_client_certificate_chain() {
        let mut pattern = RequestPattern::new();
        pattern.client_certificate_chain = vec![CertificatePattern {
            subject_distinguished_name: Some("CN=client.*".into()),
            ..CertificatePattern::default()
        }];
        let m = matcher(pattern);
        let cert = |subject: &str| Certificate {
            subject_distinguished_name: subject.to_string(),
            ..Certificate::default()
        };
        let req = HttpRequest::get("/")
            .with_certificate(cert("CN=ca"))
            .with_certificate(cert("CN=client-1"));
        assert!(m.matches(None, &req));
        assert!(!m.matches(None, &HttpRequest::get("/").with_certificate(cert("CN=ca"))));
    }

    #[test]
    fn test_difference_records_every_failure() {
        let m = matcher(
            RequestPattern::new()
                .with_method("POST")
                .with_path("/a")
                .with_body(BodyPattern::json(json!({"x": 1}), MatchType::Strict)),
        );
        let mut difference = MatchDifference::new();
        assert!(!m.matches(Some(&mut difference), &HttpRequest::get("/b").with_body("{}")));
        let fields: Vec<_> = difference.fields().collect();
        assert_eq!(fields, vec![MatchField::Method, MatchField::Path, MatchField::Body]);
    }

    #[test]
    fn test_invalid_body_matcher_is_rejected() {
        let pattern = RequestPattern::new().with_body(BodyPattern::new(BodyMatcher::XPath {
            xpath: "/a/[".into(),
            namespace_prefixes: Default::default(),
        }));
        assert!(RequestMatcher::compile(pattern).is_err());
    }

    #[test]
    fn test_pattern_serde() {
        let pattern: RequestPattern = serde_json::from_value(json!({
            "method": "!DELETE",
            "path": "/items/{id}",
            "headers": {"?X-Trace": [".*"]},
            "body": {"type": "STRING", "string": "x", "subString": true},
            "protocol": "HTTP_1_1"
        }))
        .unwrap();
        assert!(pattern.method.as_ref().unwrap().is_not());
        assert_eq!(pattern.protocol, Some(Protocol::Http11));
        let back = serde_json::to_value(&pattern).unwrap();
        assert_eq!(back["method"], "!DELETE");
        assert_eq!(back["body"]["type"], "STRING");
    }

    #[test]
    fn test_matches_definition() {
        let stored = RequestPattern::new()
            .with_method("GET")
            .with_path("/hello")
            .with_header("Accept", "text/plain")
            .with_body(BodyPattern::exact("ping"));

        let identical = matcher(stored.clone());
        assert!(identical.matches_definition(&stored));

        let by_path = matcher(RequestPattern::new().with_path("/hel.*"));
        assert!(by_path.matches_definition(&stored));

        let by_method = matcher(RequestPattern::new().with_method("POST"));
        assert!(!by_method.matches_definition(&stored));

        let by_body = matcher(RequestPattern::new().with_body(BodyPattern::new(BodyMatcher::Regex {
            regex: "pi.*".into(),
        })));
        assert!(by_body.matches_definition(&stored));

        let by_missing_header = matcher(RequestPattern::new().with_header("X-Other", ".*"));
        assert!(!by_missing_header.matches_definition(&stored));
    }
}
