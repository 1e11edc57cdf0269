//! Expectations and the registry that holds them while traffic is served.

mod circular;
mod listener;
mod registry;
mod types;


pub use circular::CircularMap;
pub use listener::{ExpectationListener, ListenerId};
pub use registry::{ActiveExpectation, Consumed, ExpectationRegistry, RegistryConfig, RegistrySnapshot};
pub use types::{parse_expectations, Cause, Expectation, TimeToLive, Times};

use crate::predicate::MatcherError;
use thiserror::Error;

/// Reasons an expectation is refused by `add`/`update`.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("expectation {id} has an invalid request matcher: {source}")]
    InvalidMatcher {
        id: String,
        #[source]
        source: MatcherError,
    },

    #[error("expectation {id} rejected: {reason}")]
    InvalidExpectation { id: String, reason: String },
}
