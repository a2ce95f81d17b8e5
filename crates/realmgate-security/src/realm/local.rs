//! Realm backed by the local user and role files

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use realmgate_common::config::LocalRealmConfig;
use realmgate_common::error::Result;

use crate::auth_result::AuthenticationResult;
use crate::clock::Clock;
use crate::realm::{Realm, RealmCapabilities};
use crate::store::{RoleStore, UserStore};
use crate::token::AuthToken;

pub const LOCAL_REALM_NAME: &str = "local";

#[derive(Debug, Clone, Copy, Default)]
struct FailedAttempts {
    count: u32,
    locked_until: Option<u64>,
}

/// Authenticates against stored credentials and authorizes from role
/// membership, with per-principal lockout after repeated failures.
pub struct LocalRealm {
    users: Arc<UserStore>,
    roles: Arc<RoleStore>,
    attempts: DashMap<String, FailedAttempts>,
    max_failed_attempts: u32,
    lockout_duration_ms: u64,
    clock: Arc<dyn Clock>,
}

impl LocalRealm {
    pub fn new(
        users: Arc<UserStore>,
        roles: Arc<RoleStore>,
        config: &LocalRealmConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            roles,
            attempts: DashMap::new(),
            max_failed_attempts: config.max_failed_attempts.max(1),
            lockout_duration_ms: config.lockout_duration_ms,
            clock,
        }
    }

    pub fn users(&self) -> &Arc<UserStore> {
        &self.users
    }

    pub fn roles(&self) -> &Arc<RoleStore> {
        &self.roles
    }

    /// Forget failed attempts for `principal`, lifting any lockout
    pub fn reset_attempts(&self, principal: &str) {
        self.attempts.remove(principal);
    }

    fn is_locked(&self, principal: &str, now: u64) -> bool {
        let locked_until = match self.attempts.get(principal) {
            Some(entry) => entry.locked_until,
            None => return false,
        };
        match locked_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.attempts.remove(principal);
                false
            }
            None => false,
        }
    }

    fn register_failure(&self, principal: &str, now: u64) {
        let mut entry = self.attempts.entry(principal.to_string()).or_default();
        entry.count += 1;
        if entry.count >= self.max_failed_attempts {
            warn!(
                "Locking '{}' for {}ms after {} failed attempts",
                principal, self.lockout_duration_ms, entry.count
            );
            entry.locked_until = Some(now.saturating_add(self.lockout_duration_ms));
        }
    }
}

#[async_trait]
impl Realm for LocalRealm {
    fn name(&self) -> &str {
        LOCAL_REALM_NAME
    }

    fn capabilities(&self) -> RealmCapabilities {
        RealmCapabilities::BOTH
    }

    async fn authenticate(&self, token: &AuthToken) -> Result<AuthenticationResult> {
        let principal = token.principal();
        let now = self.clock.now_millis();

        if self.is_locked(principal, now) {
            debug!("Rejecting '{}': locked after too many attempts", principal);
            return Ok(AuthenticationResult::TooManyAttempts);
        }

        // only known users are rate limited
        let Some(user) = self.users.find_by_name(principal) else {
            return Ok(AuthenticationResult::Failure);
        };

        if !user.credential().matches(token.credentials()) {
            self.register_failure(principal, now);
            return Ok(AuthenticationResult::Failure);
        }

        if user.is_suspended() {
            debug!("Rejecting suspended user '{}'", principal);
            return Ok(AuthenticationResult::Failure);
        }

        self.reset_attempts(principal);
        if user.password_change_required() {
            Ok(AuthenticationResult::PasswordChangeRequired)
        } else {
            Ok(AuthenticationResult::Success)
        }
    }

    async fn roles_for(&self, principal: &str) -> Result<Option<BTreeSet<String>>> {
        match self.users.find_by_name(principal) {
            None => Ok(None),
            Some(user) if user.is_suspended() => Ok(Some(BTreeSet::new())),
            Some(_) => Ok(Some(self.roles.names_containing(principal))),
        }
    }
}
