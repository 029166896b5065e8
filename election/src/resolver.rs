//! Role and eligibility resolution.

use std::sync::Arc;

use tally_ledger::ElectionLedger;
use tally_types::{Address, RoleState};

use crate::error::ElectionError;

/// Derives an account's roles from the ledger.
///
/// Holds no cache: every call reads the ledger again.
pub struct RoleResolver {
    ledger: Arc<dyn ElectionLedger>,
}

impl RoleResolver {
    pub fn new(ledger: Arc<dyn ElectionLedger>) -> Self {
        Self { ledger }
    }

    /// Resolve `account`'s roles with three concurrent ledger reads.
    ///
    /// All or nothing: if any read fails the others are discarded and the
    /// first failure is returned as [`ElectionError::Resolution`].
    pub async fn resolve(&self, account: &Address) -> Result<RoleState, ElectionError> {
        let (admin, is_registered_voter, has_voted) = tokio::try_join!(
            self.ledger.admin(),
            self.ledger.voters(account),
            self.ledger.has_voted(account),
        )
        .map_err(|e| {
            tracing::warn!(account = %account, error = %e, "role resolution failed");
            ElectionError::Resolution(e)
        })?;

        let roles = RoleState {
            is_admin: admin == *account,
            is_registered_voter,
            has_voted,
        };
        tracing::debug!(account = %account, ?roles, "roles resolved");
        Ok(roles)
    }
}
