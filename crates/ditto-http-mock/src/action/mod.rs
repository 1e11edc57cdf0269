//! Action dispatch: turns a matched expectation's action into a response.
//!
//! Responses, callbacks and templates run on the [`Scheduler`] pool so a
//! slow handler never holds a connection task. Every scheduled piece of
//! work is awaited with the configured future timeout.

mod callback;
mod forward;
mod template;

pub use callback::{CallbackHandler, CallbackRegistry};
pub use forward::Forwarder;
pub use template::{RhaiTemplateEngine, TemplateEngine};

use crate::model::{Action, Delay, HttpError, HttpRequest, HttpResponse, ResponseBody};
use crate::scheduler::Scheduler;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("forward to '{url}' failed: {reason}")]
    Forward { url: String, reason: String },

    #[error("no callback registered under '{0}'")]
    CallbackMissing(String),

    #[error("callback '{name}' failed: {reason}")]
    CallbackFailed { name: String, reason: String },

    #[error("template failed: {0}")]
    Template(String),

    #[error("invalid error response bytes: {0}")]
    InvalidResponseBytes(#[from] base64::DecodeError),

    #[error("action did not complete within {0:?}")]
    Timeout(Duration),

    #[error("action was abandoned before completing")]
    Abandoned,
}

impl ActionError {
    /// Status returned to the client when dispatch fails.
    pub fn status_code(&self) -> u16 {
        match self {
            ActionError::Forward { .. } => 502,
            _ => 500,
        }
    }
}

/// Upper bounds on upstream sockets and scheduled work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub max_socket_timeout_ms: u64,
    pub max_future_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            max_socket_timeout_ms: 20_000,
            max_future_timeout_ms: 90_000,
        }
    }
}

impl TimeoutConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.max_socket_timeout_ms)
    }

    pub fn future_timeout(&self) -> Duration {
        Duration::from_millis(self.max_future_timeout_ms)
    }
}

/// What the transport should do with the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Respond(HttpResponse),
    DropConnection,
}

pub struct ActionDispatcher {
    scheduler: Arc<Scheduler>,
    callbacks: Arc<CallbackRegistry>,
    templates: Arc<dyn TemplateEngine>,
    forwarder: Forwarder,
    future_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(
        scheduler: Arc<Scheduler>,
        callbacks: Arc<CallbackRegistry>,
        timeouts: &TimeoutConfig,
    ) -> Result<Self, ActionError> {
        Ok(Self {
            scheduler,
            callbacks,
            templates: Arc::new(RhaiTemplateEngine::new()),
            forwarder: Forwarder::new(timeouts.socket_timeout())?,
            future_timeout: timeouts.future_timeout(),
        })
    }

    pub fn with_template_engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.templates = engine;
        self
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    pub async fn dispatch(&self, action: &Action, request: &HttpRequest) -> Result<ActionOutcome, ActionError> {
        let delay = action
            .delay()
            .map(Delay::to_duration)
            .unwrap_or_default()
            .min(Delay::MAX_DURATION);
        debug!("Dispatching {} action (delay {:?})", action.kind(), delay);

        let result = match action {
            Action::Respond(response) => {
                let response = response.clone();
                self.on_scheduler(move || Ok(response), delay)
                    .await
                    .map(ActionOutcome::Respond)
            }
            Action::Forward(target) => {
                self.wait(delay).await?;
                self.forwarder
                    .forward(target, request)
                    .await
                    .map(ActionOutcome::Respond)
            }
            Action::Error(error) => {
                self.wait(delay).await?;
                error_outcome(error)
            }
            Action::Callback(callback) => {
                let name = callback.callback_name.clone();
                let handler = self
                    .callbacks
                    .get(&name)
                    .ok_or_else(|| ActionError::CallbackMissing(name.clone()))?;
                let request = request.clone();
                self.on_scheduler(
                    move || {
                        handler
                            .handle(&request)
                            .map_err(|reason| ActionError::CallbackFailed { name, reason })
                    },
                    delay,
                )
                .await
                .map(ActionOutcome::Respond)
            }
            Action::Template(template) => {
                let engine = self.templates.clone();
                let template = template.clone();
                let request = request.clone();
                self.on_scheduler(move || engine.render(&template, &request), delay)
                    .await
                    .map(ActionOutcome::Respond)
            }
        };

        if let Err(e) = &result {
            warn!("{} action failed: {}", action.kind(), e);
        }
        result
    }

    async fn wait(&self, delay: Duration) -> Result<(), ActionError> {
        if delay.is_zero() {
            return Ok(());
        }
        self.on_scheduler(|| Ok(()), delay).await
    }

    async fn on_scheduler<T, F>(&self, work: F, delay: Duration) -> Result<T, ActionError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ActionError> + Send + 'static,
    {
        let receiver = self.scheduler.spawn_with_result(work, delay);
        let limit = self.future_timeout.saturating_add(delay);
        match tokio::time::timeout(limit, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ActionError::Abandoned),
            Err(_) => Err(ActionError::Timeout(limit)),
        }
    }
}

fn error_outcome(error: &HttpError) -> Result<ActionOutcome, ActionError> {
    if error.drop_connection {
        return Ok(ActionOutcome::DropConnection);
    }
    let mut response = HttpResponse::status(500);
    if let Some(encoded) = &error.response_bytes {
        response.body = Some(ResponseBody::Binary(BASE64.decode(encoded)?));
    }
    Ok(ActionOutcome::Respond(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpCallback, HttpTemplate, TemplateType};
    use crate::scheduler::SchedulerConfig;
    use std::time::Instant;

    fn dispatcher(scheduler: Scheduler, timeouts: TimeoutConfig) -> ActionDispatcher {
        ActionDispatcher::new(Arc::new(scheduler), Arc::new(CallbackRegistry::new()), &timeouts).unwrap()
    }

    fn sync_dispatcher() -> ActionDispatcher {
        dispatcher(Scheduler::synchronous().unwrap(), TimeoutConfig::default())
    }

    fn respond(outcome: ActionOutcome) -> HttpResponse {
        match outcome {
            ActionOutcome::Respond(r) => r,
            ActionOutcome::DropConnection => panic!("connection dropped"),
        }
    }

    fn callback(name: &str) -> Action {
        Action::Callback(HttpCallback {
            callback_name: name.to_string(),
            delay: None,
        })
    }

    #[tokio::test]
    async fn test_respond() {
        let d = sync_dispatcher();
        let action = Action::Respond(HttpResponse::status(201).with_body("made"));
        let response = respond(d.dispatch(&action, &HttpRequest::get("/")).await.unwrap());
        assert_eq!(response.status_code, 201);
        assert_eq!(response.body_bytes().as_ref(), b"made");
    }

    #[tokio::test]
    async fn test_respond_applies_delay() {
        let scheduler = Scheduler::new(&SchedulerConfig {
            threads: 2,
            queue_size: 10,
            synchronous: false,
        })
        .unwrap();
        let d = dispatcher(scheduler, TimeoutConfig::default());
        let action = Action::Respond(HttpResponse::ok().with_delay(Delay::millis(60)));
        let start = Instant::now();
        d.dispatch(&action, &HttpRequest::get("/")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_huge_delay_waits_instead_of_failing() {
        let scheduler = Scheduler::new(&SchedulerConfig {
            threads: 2,
            queue_size: 10,
            synchronous: false,
        })
        .unwrap();
        let d = dispatcher(scheduler, TimeoutConfig::default());
        let action = Action::Respond(HttpResponse::ok().with_delay(Delay {
            time_unit: crate::model::TimeUnit::Days,
            value: u64::MAX,
        }));
        let pending = tokio::time::timeout(
            Duration::from_millis(100),
            d.dispatch(&action, &HttpRequest::get("/")),
        )
        .await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_error_action() {
        let d = sync_dispatcher();
        let drop = Action::Error(HttpError {
            drop_connection: true,
            ..HttpError::default()
        });
        assert_eq!(
            d.dispatch(&drop, &HttpRequest::get("/")).await.unwrap(),
            ActionOutcome::DropConnection
        );

        let bytes = Action::Error(HttpError {
            response_bytes: Some(BASE64.encode(b"boom")),
            ..HttpError::default()
        });
        let response = respond(d.dispatch(&bytes, &HttpRequest::get("/")).await.unwrap());
        assert_eq!(response.status_code, 500);
        assert_eq!(response.body_bytes().as_ref(), b"boom");

        let invalid = Action::Error(HttpError {
            response_bytes: Some("***".to_string()),
            ..HttpError::default()
        });
        let err = d.dispatch(&invalid, &HttpRequest::get("/")).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidResponseBytes(_)));
    }

    #[tokio::test]
    async fn test_callbacks() {
        let d = sync_dispatcher();
        let err = d.dispatch(&callback("missing"), &HttpRequest::get("/")).await.unwrap_err();
        assert!(matches!(err, ActionError::CallbackMissing(ref n) if n == "missing"));
        assert_eq!(err.status_code(), 500);

        d.callbacks()
            .register_fn("echo", |req: &HttpRequest| Ok(HttpResponse::ok().with_body(req.method.clone())));
        d.callbacks().register_fn("broken", |_: &HttpRequest| Err("nope".to_string()));

        let response = respond(d.dispatch(&callback("echo"), &HttpRequest::post("/")).await.unwrap());
        assert_eq!(response.body_bytes().as_ref(), b"POST");

        let err = d.dispatch(&callback("broken"), &HttpRequest::get("/")).await.unwrap_err();
        assert!(matches!(err, ActionError::CallbackFailed { ref reason, .. } if reason == "nope"));
    }

    #[tokio::test]
    async fn test_template() {
        let d = sync_dispatcher();
        let action = Action::Template(HttpTemplate {
            template_type: TemplateType::Rhai,
            template: r#"#{ statusCode: 200, body: "hello " + request.path }"#.to_string(),
            delay: None,
        });
        let response = respond(d.dispatch(&action, &HttpRequest::get("/bob")).await.unwrap());
        assert_eq!(response.body_bytes().as_ref(), b"hello /bob");
    }

    #[tokio::test]
    async fn test_slow_callback_times_out() {
        let scheduler = Scheduler::new(&SchedulerConfig {
            threads: 1,
            queue_size: 10,
            synchronous: false,
        })
        .unwrap();
        let d = dispatcher(
            scheduler,
            TimeoutConfig {
                max_future_timeout_ms: 50,
                ..TimeoutConfig::default()
            },
        );
        d.callbacks().register_fn("slow", |_: &HttpRequest| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(HttpResponse::ok())
        });
        let err = d.dispatch(&callback("slow"), &HttpRequest::get("/")).await.unwrap_err();
        assert!(matches!(err, ActionError::Timeout(_)));
    }

    #[test]
    fn test_status_codes() {
        let forward = ActionError::Forward {
            url: "http://x".into(),
            reason: "refused".into(),
        };
        assert_eq!(forward.status_code(), 502);
        assert_eq!(ActionError::Template("x".into()).status_code(), 500);
        assert_eq!(ActionError::Timeout(Duration::from_millis(1)).status_code(), 500);
    }
}
