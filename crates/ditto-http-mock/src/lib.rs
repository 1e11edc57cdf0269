//! Programmable HTTP mock server.
//!
//! Expectations pair a request matcher with an action. Incoming requests are
//! matched against the registry in priority order; the first active match is
//! consumed and its action produces the response.

// ===== Matching and model =====
pub mod model;
pub mod predicate;

// ===== Expectation lifecycle =====
pub mod expectation;
pub mod scheduler;

// ===== Serving =====
pub mod action;
pub mod config;
pub mod context;
pub mod event_log;
pub mod initializer;
pub mod persistence;
pub mod server;

pub use action::{ActionDispatcher, ActionError, ActionOutcome, CallbackHandler, CallbackRegistry};
pub use config::Config;
pub use context::MockServerContext;
pub use event_log::{EventLog, VerificationTimes};
pub use expectation::{Cause, Expectation, ExpectationRegistry, RegistryError, TimeToLive, Times};
pub use model::{Action, HttpRequest, HttpResponse};
pub use predicate::{MatcherError, RequestMatcher, RequestPattern};
pub use scheduler::Scheduler;
pub use server::{MockServer, ServerHandle};
