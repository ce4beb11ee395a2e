//! Request guard composing the address and wallet checks.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::backend::RateLimitBackend;
use super::decision::RateLimitDecision;
use super::key::{build_key, build_wallet_key, RequestIdentity};
use super::policy::{Policy, PolicyRegistry};
use crate::error::{Result, TollgateError};

/// Applies policies to requests on top of a [`RateLimitBackend`].
pub struct RateLimitGuard<B: RateLimitBackend> {
    /// The rate limiter instance
    backend: Arc<B>,
    /// Presets resolvable by name
    registry: Arc<PolicyRegistry>,
}

impl<B: RateLimitBackend> RateLimitGuard<B> {
    /// Create a guard using the built-in presets.
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_registry(backend, Arc::new(PolicyRegistry::builtin()))
    }

    /// Create a guard with an explicit preset table.
    pub fn with_registry(backend: Arc<B>, registry: Arc<PolicyRegistry>) -> Self {
        Self { backend, registry }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Admit or reject a request under `policy`.
    ///
    /// The network-address key is always checked first and a denial there
    /// returns immediately. If the request carries a wallet, a second,
    /// independent check runs on the wallet key, with half the limit when the
    /// policy is strict, so rotating addresses does not reset an
    /// authenticated caller's budget.
    ///
    /// On success, returns the more restrictive of the decisions made.
    #[instrument(
        skip(self, identity, policy),
        fields(policy = %policy.name())
    )]
    pub fn apply(&self, identity: &RequestIdentity, policy: &Policy) -> Result<RateLimitDecision> {
        let address_key = build_key(policy.prefix(), identity);
        let decision = self.backend.check(&address_key, policy.limit());

        if !decision.allowed {
            info!(
                key = %address_key,
                limit = decision.limit,
                reset_in_ms = decision.reset_in_ms(),
                "Request rejected by address limit"
            );
            return Err(exceeded(address_key, &decision));
        }

        let Some(wallet_key) = build_wallet_key(policy.prefix(), identity) else {
            return Ok(decision);
        };

        let wallet_decision = self.backend.check(&wallet_key, &policy.wallet_limit());
        if !wallet_decision.allowed {
            warn!(
                key = %wallet_key,
                address = %identity.client_address(),
                limit = wallet_decision.limit,
                strict = policy.is_strict(),
                reset_in_ms = wallet_decision.reset_in_ms(),
                "Request rejected by wallet limit"
            );
            return Err(exceeded(wallet_key, &wallet_decision));
        }

        debug!(
            address_remaining = decision.remaining,
            wallet_remaining = wallet_decision.remaining,
            "Request admitted"
        );

        Ok(if wallet_decision.remaining < decision.remaining {
            wallet_decision
        } else {
            decision
        })
    }

    /// Admit or reject a request under the preset called `name`.
    pub fn apply_preset(&self, identity: &RequestIdentity, name: &str) -> Result<RateLimitDecision> {
        let policy = self.registry.require(name)?;
        self.apply(identity, policy)
    }
}

impl<B: RateLimitBackend> Clone for RateLimitGuard<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            registry: Arc::clone(&self.registry),
        }
    }
}

fn exceeded(key: String, decision: &RateLimitDecision) -> TollgateError {
    TollgateError::RateLimitExceeded {
        key,
        limit: decision.limit,
        reset_in: decision.reset_in,
    }
}
