//! Conversions from model responses to hyper responses.

use crate::model::HttpResponse;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, SET_COOKIE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

pub type HyperResponse = Response<Full<Bytes>>;

fn with_status(status: u16, body: Bytes) -> HyperResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
}

pub fn to_hyper(model: &HttpResponse) -> HyperResponse {
    let body = model.body_bytes();
    let mut response = with_status(model.status_code, body);

    if let Some(phrase) = &model.reason_phrase {
        match ReasonPhrase::try_from(phrase.clone().into_bytes()) {
            Ok(phrase) => {
                response.extensions_mut().insert(phrase);
            }
            Err(_) => warn!("Ignoring invalid reason phrase {:?}", phrase),
        }
    }

    let headers = response.headers_mut();
    for kv in model.headers.iter() {
        let Ok(name) = HeaderName::from_bytes(kv.name.value().as_bytes()) else {
            warn!("Ignoring invalid header name {:?}", kv.name.value());
            continue;
        };
        for value in &kv.values {
            match HeaderValue::from_str(value.value()) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => warn!("Ignoring invalid value for header {}", name),
            }
        }
    }
    for kv in model.cookies.iter() {
        for value in &kv.values {
            if let Ok(cookie) = HeaderValue::from_str(&format!("{}={}", kv.name.value(), value.value())) {
                headers.append(SET_COOKIE, cookie);
            }
        }
    }
    if !headers.contains_key(CONTENT_TYPE) {
        if let Some(body) = &model.body {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static(body.default_content_type()),
            );
        }
    }
    response
}

pub fn json_response<T: Serialize>(status: u16, value: &T) -> HyperResponse {
    match serde_json::to_vec_pretty(value) {
        Ok(body) => {
            let mut response = with_status(status, Bytes::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => error_response(500, &format!("failed to serialize response: {e}")),
    }
}

/// JSON error body: `{"error": "..."}`.
pub fn error_response(status: u16, message: &str) -> HyperResponse {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = with_status(status, Bytes::from(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn text_response(status: u16, body: impl Into<String>) -> HyperResponse {
    let mut response = with_status(status, Bytes::from(body.into()));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

pub fn empty_response(status: u16) -> HyperResponse {
    with_status(status, Bytes::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_hyper_copies_fields() {
        let model = HttpResponse::status(201)
            .with_header("X-Multi", "a")
            .with_header("X-Multi", "b")
            .with_cookie("session", "42")
            .with_body("done");
        let response = to_hyper(&model);
        assert_eq!(response.status(), StatusCode::CREATED);
        let multi: Vec<_> = response.headers().get_all("x-multi").iter().collect();
        assert_eq!(multi.len(), 2);
        assert_eq!(response.headers().get(SET_COOKIE).unwrap(), "session=42");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            model.body.as_ref().unwrap().default_content_type()
        );
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let model = HttpResponse::ok()
            .with_header("Content-Type", "application/xml")
            .with_json(json!({"a": 1}));
        let response = to_hyper(&model);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/xml");
    }

    #[test]
    fn test_invalid_status_and_reason_phrase() {
        let mut model = HttpResponse::status(42);
        model.reason_phrase = Some("Custom Reason".to_string());
        let response = to_hyper(&model);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.extensions().get::<ReasonPhrase>().unwrap().as_bytes(),
            b"Custom Reason"
        );
    }

    #[test]
    fn test_error_response_body() {
        let response = error_response(502, "upstream \"down\"");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");
    }
}
