//! Actions an expectation performs once matched.

use super::delay::Delay;
use super::request::Scheme;
use super::response::HttpResponse;
use serde::{Deserialize, Serialize};

/// Upstream to re-issue the matched request against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpForward {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

fn default_port() -> u16 {
    80
}

impl HttpForward {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

/// Fault injected instead of a normal response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpError {
    #[serde(default)]
    pub drop_connection: bool,
    /// Base64-encoded bytes written as the body of a 500 response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_bytes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

/// Reference to a named handler in the callback registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCallback {
    pub callback_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateType {
    #[default]
    Rhai,
}

/// Script evaluated against the request to produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTemplate {
    #[serde(default)]
    pub template_type: TemplateType,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

/// The action half of an expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "httpResponse")]
    Respond(HttpResponse),
    #[serde(rename = "httpForward")]
    Forward(HttpForward),
    #[serde(rename = "httpError")]
    Error(HttpError),
    #[serde(rename = "httpCallback")]
    Callback(HttpCallback),
    #[serde(rename = "httpResponseTemplate")]
    Template(HttpTemplate),
}

impl Action {
    pub fn delay(&self) -> Option<&Delay> {
        match self {
            Action::Respond(r) => r.delay.as_ref(),
            Action::Forward(f) => f.delay.as_ref(),
            Action::Error(e) => e.delay.as_ref(),
            Action::Callback(c) => c.delay.as_ref(),
            Action::Template(t) => t.delay.as_ref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Respond(_) => "response",
            Action::Forward(_) => "forward",
            Action::Error(_) => "error",
            Action::Callback(_) => "callback",
            Action::Template(_) => "template",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_tags() {
        let a: Action = serde_json::from_value(json!({"httpForward": {"host": "example.com"}})).unwrap();
        match &a {
            Action::Forward(f) => assert_eq!(f.base_url(), "http://example.com:80"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(a.kind(), "forward");

        let e: Action = serde_json::from_value(json!({"httpError": {"dropConnection": true}})).unwrap();
        assert_eq!(e, Action::Error(HttpError { drop_connection: true, ..HttpError::default() }));
    }
}
