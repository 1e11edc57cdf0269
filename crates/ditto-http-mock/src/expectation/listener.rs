//! Change notification for registry observers.

use super::registry::RegistrySnapshot;
use super::types::Cause;

/// Observer of registry mutations.
///
/// Called on a scheduler thread after the mutation has completed, with an
/// immutable snapshot of the registry at that point.
pub trait ExpectationListener: Send + Sync {
    fn updated(&self, snapshot: &RegistrySnapshot, cause: Cause);
}

impl<F> ExpectationListener for F
where
    F: Fn(&RegistrySnapshot, Cause) + Send + Sync,
{
    fn updated(&self, snapshot: &RegistrySnapshot, cause: Cause) {
        self(snapshot, cause)
    }
}

/// Handle returned by `register_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(super) u64);
