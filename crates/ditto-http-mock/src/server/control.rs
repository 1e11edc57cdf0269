//! Control plane served under `/mockserver/`.

use super::response::{empty_response, error_response, json_response, text_response, HyperResponse};
use crate::context::MockServerContext;
use crate::event_log::{Verification, VerificationSequence};
use crate::expectation::{parse_expectations, Cause};
use crate::model::parse_query_string;
use crate::predicate::{RequestMatcher, RequestPattern};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

pub const CONTROL_PREFIX: &str = "/mockserver/";

pub fn is_control_path(path: &str) -> bool {
    path.starts_with(CONTROL_PREFIX)
}

/// What `clear` and `retrieve` act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Expectations,
    Log,
    All,
}

pub fn handle(context: &MockServerContext, method: &str, path: &str, query: &str, body: &[u8]) -> HyperResponse {
    if method != "PUT" && method != "POST" {
        return error_response(405, &format!("{method} is not supported on the control plane, use PUT"));
    }
    let params = parse_query_string(query);
    let type_param = params
        .get_first("type", true)
        .map(|t| t.to_ascii_lowercase());
    debug!("Control request {} {}", method, path);

    let endpoint = path.strip_prefix(CONTROL_PREFIX).unwrap_or(path);
    match endpoint {
        "expectation" => create_expectations(context, body),
        "clear" => {
            let target = match type_param.as_deref() {
                None | Some("all") => Target::All,
                Some("expectations") => Target::Expectations,
                Some("log") => Target::Log,
                Some(other) => return error_response(400, &format!("unknown clear type '{other}'")),
            };
            clear(context, target, body)
        }
        "reset" => {
            context.reset();
            info!("Reset expectations and request log");
            empty_response(200)
        }
        "retrieve" => {
            let target = match type_param.as_deref() {
                None | Some("requests") => Target::Log,
                Some("active_expectations") => Target::Expectations,
                Some(other) => return error_response(400, &format!("unknown retrieve type '{other}'")),
            };
            retrieve(context, target, body)
        }
        "verify" => verify(context, body),
        "verifySequence" => verify_sequence(context, body),
        other => error_response(404, &format!("unknown control endpoint '{other}'")),
    }
}

fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, HyperResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| error_response(400, &format!("invalid request body: {e}")))
}

fn compile(pattern: RequestPattern) -> Result<RequestMatcher, HyperResponse> {
    RequestMatcher::compile(pattern).map_err(|e| error_response(400, &e.to_string()))
}

/// Optional request matcher body.
fn filter(body: &[u8]) -> Result<Option<RequestMatcher>, HyperResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let pattern: RequestPattern = parse_body(body)?;
    compile(pattern).map(Some)
}

fn create_expectations(context: &MockServerContext, body: &[u8]) -> HyperResponse {
    let text = String::from_utf8_lossy(body);
    let expectations = match parse_expectations(&text) {
        Ok(expectations) => expectations,
        Err(e) => return error_response(400, &format!("invalid expectation: {e}")),
    };
    match context.registry.update(expectations, Cause::Api) {
        Ok(upserted) => json_response(201, &upserted),
        Err(e) => error_response(400, &e.to_string()),
    }
}

fn clear(context: &MockServerContext, target: Target, body: &[u8]) -> HyperResponse {
    let matcher = match filter(body) {
        Ok(matcher) => matcher,
        Err(response) => return response,
    };
    if matches!(target, Target::Expectations | Target::All) {
        context.registry.clear(matcher.as_ref(), Cause::Api);
    }
    if matches!(target, Target::Log | Target::All) {
        let removed = context.event_log.clear(matcher.as_ref());
        debug!("Cleared {} logged request(s)", removed);
    }
    empty_response(200)
}

fn retrieve(context: &MockServerContext, target: Target, body: &[u8]) -> HyperResponse {
    let matcher = match filter(body) {
        Ok(matcher) => matcher,
        Err(response) => return response,
    };
    match target {
        Target::Expectations => json_response(
            200,
            &context.registry.retrieve_active_expectations(matcher.as_ref()),
        ),
        _ => json_response(200, &context.event_log.retrieve_requests(matcher.as_ref())),
    }
}

fn verify(context: &MockServerContext, body: &[u8]) -> HyperResponse {
    let verification: Verification = match parse_body(body) {
        Ok(v) => v,
        Err(response) => return response,
    };
    let matcher = match compile(verification.http_request) {
        Ok(matcher) => matcher,
        Err(response) => return response,
    };
    match context.event_log.verify(&matcher, verification.times) {
        Ok(()) => empty_response(202),
        Err(failure) => text_response(406, failure.0),
    }
}

fn verify_sequence(context: &MockServerContext, body: &[u8]) -> HyperResponse {
    let sequence: VerificationSequence = match parse_body(body) {
        Ok(v) => v,
        Err(response) => return response,
    };
    let matchers: Result<Vec<_>, _> = sequence.http_requests.into_iter().map(compile).collect();
    let matchers = match matchers {
        Ok(matchers) => matchers,
        Err(response) => return response,
    };
    match context.event_log.verify_sequence(&matchers) {
        Ok(()) => empty_response(202),
        Err(failure) => text_response(406, failure.0),
    }
}
