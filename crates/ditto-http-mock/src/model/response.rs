//! Mock responses returned by the `Respond` action.

use super::delay::Delay;
use crate::predicate::MultiValueMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response body in one of the supported encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ResponseBody {
    Text(String),
    Json(Value),
    Binary(Vec<u8>),
}

impl ResponseBody {
    pub fn to_bytes(&self) -> Bytes {
        match self {
            ResponseBody::Text(text) => Bytes::from(text.clone()),
            ResponseBody::Json(value) => Bytes::from(value.to_string()),
            ResponseBody::Binary(bytes) => Bytes::from(bytes.clone()),
        }
    }

    /// Content type used when the response sets none.
    pub fn default_content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text(_) => "text/plain; charset=utf-8",
            ResponseBody::Json(_) => "application/json",
            ResponseBody::Binary(_) => "application/octet-stream",
        }
    }
}

impl TryFrom<Value> for ResponseBody {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(ResponseBody::Text(s)),
            Value::Object(ref o) if o.get("type").is_some_and(Value::is_string) => {
                let kind = o.get("type").and_then(Value::as_str).unwrap_or_default();
                match kind {
                    "STRING" => Ok(ResponseBody::Text(
                        o.get("string").and_then(Value::as_str).unwrap_or_default().to_string(),
                    )),
                    "JSON" => match o.get("json") {
                        Some(Value::String(raw)) => serde_json::from_str(raw)
                            .map(ResponseBody::Json)
                            .map_err(|e| format!("invalid json body: {e}")),
                        Some(v) => Ok(ResponseBody::Json(v.clone())),
                        None => Ok(ResponseBody::Json(Value::Null)),
                    },
                    "BINARY" => {
                        let encoded = o.get("base64Bytes").and_then(Value::as_str).unwrap_or_default();
                        BASE64
                            .decode(encoded)
                            .map(ResponseBody::Binary)
                            .map_err(|e| format!("invalid base64Bytes: {e}"))
                    }
                    _ => Ok(ResponseBody::Json(value.clone())),
                }
            }
            other => Ok(ResponseBody::Json(other)),
        }
    }
}

impl From<ResponseBody> for Value {
    fn from(body: ResponseBody) -> Self {
        match body {
            ResponseBody::Text(s) => Value::String(s),
            ResponseBody::Json(v) => json!({"type": "JSON", "json": v}),
            ResponseBody::Binary(b) => json!({"type": "BINARY", "base64Bytes": BASE64.encode(b)}),
        }
    }
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    #[serde(default = "default_status")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_phrase: Option<String>,
    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub headers: MultiValueMap,
    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub cookies: MultiValueMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<ResponseBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status_code: default_status(),
            reason_phrase: None,
            headers: MultiValueMap::new(),
            cookies: MultiValueMap::new(),
            body: None,
            delay: None,
        }
    }
}

impl HttpResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn status(status_code: u16) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }

    pub fn not_found() -> Self {
        Self::status(404)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value): (String, String) = (name.into(), value.into());
        self.headers.insert(name, value);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value): (String, String) = (name.into(), value.into());
        self.cookies.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(ResponseBody::Text(body.into()));
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(ResponseBody::Json(body));
        self
    }

    pub fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn body_bytes(&self) -> Bytes {
        self.body.as_ref().map(ResponseBody::to_bytes).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_defaults() {
        let r: HttpResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(r.status_code, 200);
        assert!(r.body.is_none());
    }

    #[test]
    fn test_body_forms() {
        let r: HttpResponse = serde_json::from_value(json!({"body": "world"})).unwrap();
        assert_eq!(r.body_bytes(), Bytes::from("world"));

        let r: HttpResponse = serde_json::from_value(json!({"body": {"a": 1}})).unwrap();
        assert_eq!(r.body, Some(ResponseBody::Json(json!({"a": 1}))));

        let r: HttpResponse =
            serde_json::from_value(json!({"body": {"type": "JSON", "json": "{\"b\":2}"}})).unwrap();
        assert_eq!(r.body_bytes(), Bytes::from("{\"b\":2}"));

        let r: HttpResponse =
            serde_json::from_value(json!({"body": {"type": "BINARY", "base64Bytes": "AAE="}})).unwrap();
        assert_eq!(r.body, Some(ResponseBody::Binary(vec![0, 1])));
        assert_eq!(r.body.as_ref().unwrap().default_content_type(), "application/octet-stream");
    }
}
