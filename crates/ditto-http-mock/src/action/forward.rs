//! Re-issues matched requests against an upstream.

use super::ActionError;
use crate::model::{HttpForward, HttpRequest, HttpResponse, ResponseBody};
use crate::predicate::MultiValueMap;
use std::time::Duration;
use tracing::debug;

/// Headers scoped to a single connection, never copied across the hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn skip_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "host" || name == "content-length" || HOP_BY_HOP.contains(&name.as_str())
}

pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(socket_timeout: Duration) -> Result<Self, ActionError> {
        let client = reqwest::Client::builder()
            .timeout(socket_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ActionError::Forward {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    pub async fn forward(&self, target: &HttpForward, request: &HttpRequest) -> Result<HttpResponse, ActionError> {
        let url = format!("{}{}", target.base_url(), request.path_and_query());
        let failed = |reason: String| ActionError::Forward {
            url: url.clone(),
            reason,
        };

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| failed(format!("invalid method: {e}")))?;
        let mut upstream = self.client.request(method, &url);
        for kv in request.headers.iter() {
            if skip_header(kv.name.value()) {
                continue;
            }
            for value in &kv.values {
                upstream = upstream.header(kv.name.value(), value.value());
            }
        }
        if !request.body.is_empty() {
            upstream = upstream.body(request.body.clone());
        }

        debug!("Forwarding {} {}", request.method, url);
        let response = upstream.send().await.map_err(|e| failed(e.to_string()))?;

        let status_code = response.status().as_u16();
        let reason_phrase = response.status().canonical_reason().map(str::to_string);
        let mut headers = MultiValueMap::new();
        for (name, value) in response.headers() {
            if skip_header(name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                let (name, value): (String, String) = (name.as_str().to_string(), value.to_string());
                headers.insert(name, value);
            }
        }
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        let body = if bytes.is_empty() {
            None
        } else {
            Some(match String::from_utf8(bytes.to_vec()) {
                Ok(text) => ResponseBody::Text(text),
                Err(e) => ResponseBody::Binary(e.into_bytes()),
            })
        };

        Ok(HttpResponse {
            status_code,
            reason_phrase,
            headers,
            body,
            ..HttpResponse::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Scheme;

    #[test]
    fn test_skip_header() {
        assert!(skip_header("Host"));
        assert!(skip_header("content-length"));
        assert!(skip_header("Transfer-Encoding"));
        assert!(skip_header("connection"));
        assert!(!skip_header("x-request-id"));
        assert!(!skip_header("content-type"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_forward_error() {
        let forwarder = Forwarder::new(Duration::from_millis(500)).unwrap();
        let target = HttpForward {
            host: "127.0.0.1".to_string(),
            port: 1,
            scheme: Scheme::Http,
            delay: None,
        };
        let err = forwarder.forward(&target, &HttpRequest::get("/x")).await.unwrap_err();
        match err {
            ActionError::Forward { url, .. } => assert_eq!(url, "http://127.0.0.1:1/x"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
