//! At-most-one workflow in flight per identity.

use crate::cancellation::CancellationToken;
use crate::errors::BusyError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Tracks which identities have a workflow running.
///
/// Entries are claimed through the map's entry API, so two concurrent
/// claims for the same identity cannot both succeed.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    entries: DashMap<String, Arc<CancellationToken>>,
}

impl InFlightRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `identity`, or fails with [`BusyError`] if it is taken.
    ///
    /// The claim lasts as long as the returned permit.
    pub fn acquire(self: &Arc<Self>, identity: &str) -> Result<InFlightPermit, BusyError> {
        match self.entries.entry(identity.to_string()) {
            Entry::Occupied(_) => {
                debug!(identity, "Identity busy");
                Err(BusyError {
                    identity: identity.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                let token = Arc::new(CancellationToken::new());
                slot.insert(Arc::clone(&token));
                Ok(InFlightPermit {
                    registry: Arc::clone(self),
                    identity: identity.to_string(),
                    token,
                })
            }
        }
    }

    /// Cancels the workflow running for `identity`.
    ///
    /// Returns false if nothing is running for it.
    pub fn cancel(&self, identity: &str, reason: &str) -> bool {
        let Some(token) = self.entries.get(identity).map(|e| Arc::clone(e.value())) else {
            return false;
        };
        info!(identity, reason, "Cancelling workflow");
        token.cancel(reason);
        true
    }

    /// Returns true if `identity` has a workflow running.
    #[must_use]
    pub fn is_running(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    /// Returns the number of workflows in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Proof that an identity is claimed. Dropping it frees the identity.
#[derive(Debug)]
pub struct InFlightPermit {
    registry: Arc<InFlightRegistry>,
    identity: String,
    token: Arc<CancellationToken>,
}

impl InFlightPermit {
    /// Returns the claimed identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Returns the token that cancels this workflow.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        // Only remove our own entry.
        self.registry
            .entries
            .remove_if(&self.identity, |_, token| Arc::ptr_eq(token, &self.token));
    }
}
