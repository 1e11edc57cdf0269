//! Per-request handling: control plane, expectation matching and dispatch.

use super::control;
use super::response::{error_response, to_hyper, HyperResponse};
use crate::action::ActionOutcome;
use crate::context::MockServerContext;
use crate::model::{HttpRequest, HttpResponse, Protocol, Scheme};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{CONNECTION, HOST};
use hyper::{Request, Version};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Returned to hyper to abort the connection without writing a response.
#[derive(Debug, Error)]
#[error("connection dropped by error action")]
pub struct ConnectionDropped;

pub async fn handle_request(
    req: Request<Incoming>,
    context: Arc<MockServerContext>,
    local_addr: SocketAddr,
) -> Result<HyperResponse, ConnectionDropped> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!("Failed to read request body: {}", e);
            return Ok(error_response(400, "failed to read request body"));
        }
    };

    let path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or("").to_string();
    if control::is_control_path(&path) {
        return Ok(control::handle(&context, parts.method.as_str(), &path, &query, &body));
    }

    let mut request = HttpRequest::new(parts.method.as_str(), path).with_query_string(&query);
    for (name, value) in &parts.headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        request = request.with_header(name.as_str(), value);
    }
    let (host, port) = parts
        .headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(|h| split_host(h, local_addr.port()))
        .unwrap_or_else(|| (local_addr.ip().to_string(), local_addr.port()));
    let protocol = if parts.version == Version::HTTP_2 {
        Protocol::Http2
    } else {
        Protocol::Http11
    };
    request = request
        .with_body(body)
        .with_socket_address(host, port, Scheme::Http)
        .with_protocol(protocol)
        .with_keep_alive(keep_alive(parts.version, parts.headers.get(CONNECTION).and_then(|v| v.to_str().ok())))
        .with_secure(false);

    serve_mock(&context, request).await
}

/// Match, consume and dispatch a non-control request.
pub async fn serve_mock(context: &MockServerContext, request: HttpRequest) -> Result<HyperResponse, ConnectionDropped> {
    let Some(active) = context.registry.match_and_consume(&request) else {
        if tracing::enabled!(tracing::Level::DEBUG) {
            for (id, difference) in context.registry.explain(&request) {
                debug!("Expectation {} did not match: {}", id, difference);
            }
        }
        context.event_log.log(request, None);
        return Ok(to_hyper(&HttpResponse::not_found()));
    };

    let expectation = active.definition();
    info!(
        "{} {} matched expectation {}",
        request.method, request.path, expectation.id
    );
    context.event_log.log(request.clone(), Some(expectation.id.clone()));

    match context.dispatcher.dispatch(&expectation.action, &request).await {
        Ok(ActionOutcome::Respond(response)) => Ok(to_hyper(&response)),
        Ok(ActionOutcome::DropConnection) => {
            debug!("Dropping connection for expectation {}", expectation.id);
            Err(ConnectionDropped)
        }
        Err(e) => Ok(error_response(e.status_code(), &e.to_string())),
    }
}

fn split_host(header: &str, default_port: u16) -> (String, u16) {
    match header.rsplit_once(':').map(|(host, port)| (host, port.parse::<u16>())) {
        Some((host, Ok(port))) if !host.is_empty() => (host.to_string(), port),
        _ => (header.to_string(), default_port),
    }
}

fn keep_alive(version: Version, connection: Option<&str>) -> bool {
    let connection = connection.map(str::to_ascii_lowercase);
    match connection.as_deref() {
        Some(c) if c.contains("close") => false,
        Some(c) if c.contains("keep-alive") => true,
        _ => version != Version::HTTP_10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::expectation::{Cause, Expectation, Times};
    use crate::model::{Action, HttpError};
    use crate::predicate::RequestPattern;
    use hyper::StatusCode;

    fn context() -> MockServerContext {
        let mut config = Config::default();
        config.scheduler.synchronous = true;
        MockServerContext::new(config).unwrap()
    }

    #[test]
    fn test_split_host() {
        assert_eq!(split_host("example.com:8080", 80), ("example.com".to_string(), 8080));
        assert_eq!(split_host("example.com", 80), ("example.com".to_string(), 80));
        assert_eq!(split_host("[::1]:9000", 80), ("[::1]".to_string(), 9000));
    }

    #[test]
    fn test_keep_alive() {
        assert!(keep_alive(Version::HTTP_11, None));
        assert!(!keep_alive(Version::HTTP_11, Some("close")));
        assert!(!keep_alive(Version::HTTP_10, None));
        assert!(keep_alive(Version::HTTP_10, Some("Keep-Alive")));
    }

    #[tokio::test]
    async fn test_serve_mock_logs_and_consumes() {
        let context = context();
        context
            .registry
            .add(
                Expectation::respond(RequestPattern::new().with_path("/once"), HttpResponse::status(204))
                    .with_id("once")
                    .with_times(Times::once()),
                Cause::Api,
            )
            .unwrap();

        let first = serve_mock(&context, HttpRequest::get("/once")).await.unwrap();
        assert_eq!(first.status(), StatusCode::NO_CONTENT);
        let second = serve_mock(&context, HttpRequest::get("/once")).await.unwrap();
        assert_eq!(second.status(), StatusCode::NOT_FOUND);

        let logged = context.event_log.retrieve_logged(None);
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].expectation_id.as_deref(), Some("once"));
        assert!(logged[1].expectation_id.is_none());
        context.shutdown();
    }

    #[tokio::test]
    async fn test_drop_connection() {
        let context = context();
        context
            .registry
            .add(
                Expectation::new(
                    RequestPattern::new(),
                    Action::Error(HttpError {
                        drop_connection: true,
                        ..HttpError::default()
                    }),
                ),
                Cause::Api,
            )
            .unwrap();
        assert!(serve_mock(&context, HttpRequest::get("/")).await.is_err());
        context.shutdown();
    }
}
