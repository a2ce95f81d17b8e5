//! Login and authorization across an ordered list of realms

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use tracing::{debug, info, warn};

use realmgate_common::config::SecurityConfig;
use realmgate_common::error::{AuthError, Error, Result};
use realmgate_common::metrics;

use crate::audit::{AuditEntry, AuditSink};
use crate::auth_result::AuthenticationResult;
use crate::cache::AuthCache;
use crate::clock::Clock;
use crate::context::SecurityContext;
use crate::realm::Realm;
use crate::roles::RoleModeMapping;
use crate::token::AuthToken;

type HmacSha256 = Hmac<Sha256>;

/// A cached login outcome
#[derive(Debug, Clone)]
pub struct CachedAuth {
    pub result: AuthenticationResult,
    pub principal: String,
    /// Realm that produced the result
    pub realm: String,
    pub context: SecurityContext,
}

pub struct RealmCoordinator {
    realms: Vec<Arc<dyn Realm>>,
    cache: Option<AuthCache<String, CachedAuth>>,
    role_modes: RoleModeMapping,
    audit: Arc<dyn AuditSink>,
    auth_enabled: bool,
    fingerprint_key: [u8; 32],
}

impl RealmCoordinator {
    /// `realms` are consulted in the given order
    pub fn new(
        config: &SecurityConfig,
        realms: Vec<Arc<dyn Realm>>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let mut names = HashSet::new();
        for realm in &realms {
            if !names.insert(realm.name().to_string()) {
                return Err(Error::Validation(format!(
                    "Realm '{}' is registered twice",
                    realm.name()
                )));
            }
        }

        let cache = if config.auth_cache.enabled {
            Some(AuthCache::from_config(&config.auth_cache, clock)?)
        } else {
            None
        };

        let mut fingerprint_key = [0u8; 32];
        SystemRandom::new()
            .fill(&mut fingerprint_key)
            .map_err(|_| Error::Internal("Failed to generate fingerprint key".to_string()))?;

        info!(
            "Realm coordinator ready with realms [{}]",
            realms.iter().map(|r| r.name()).collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            realms,
            cache,
            role_modes: RoleModeMapping::from_config(&config.role_modes)?
                .with_admin_roles(config.admin_roles.iter().cloned()),
            audit,
            auth_enabled: config.auth_enabled,
            fingerprint_key,
        })
    }

    pub fn realms(&self) -> &[Arc<dyn Realm>] {
        &self.realms
    }

    pub fn role_modes(&self) -> &RoleModeMapping {
        &self.role_modes
    }

    /// Authenticate `token` and build the session context.
    ///
    /// Unknown principals and wrong credentials are not errors; they yield a
    /// context without privileges whose `auth_result` says why.
    pub async fn login(&self, token: &AuthToken) -> Result<SecurityContext> {
        token.validate()?;

        if !self.auth_enabled {
            return Ok(SecurityContext::auth_disabled());
        }

        let start = Instant::now();
        let principal = token.principal();
        let key = self.fingerprint(token)?;

        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            debug!("Auth cache hit for '{}'", principal);
            self.report(principal, &cached.realm, cached.result, "cached login");
            return Ok(cached.context);
        }

        let candidates: Vec<&Arc<dyn Realm>> = self
            .realms
            .iter()
            .filter(|realm| realm.capabilities().authentication)
            .filter(|realm| token.realm().map_or(true, |scope| scope == realm.name()))
            .collect();

        if candidates.is_empty() {
            let reason = match token.realm() {
                Some(scope) => format!("No authentication realm named '{}'", scope),
                None => "No authentication realm configured".to_string(),
            };
            self.report(principal, "", AuthenticationResult::Failure, &reason);
            return Err(AuthError::AllRealmsUnavailable(reason).into());
        }

        let mut merged: Option<(AuthenticationResult, &str)> = None;
        let mut errors = Vec::new();

        for realm in candidates {
            match realm.authenticate(token).await {
                Ok(result) => {
                    debug!("Realm '{}' answered {} for '{}'", realm.name(), result, principal);
                    merged = Some(match merged {
                        Some((current, origin)) if current.merge(result) == current => (current, origin),
                        _ => (result, realm.name()),
                    });
                    if result == AuthenticationResult::Success {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Realm '{}' failed to authenticate '{}': {}", realm.name(), principal, e);
                    metrics::record_realm_error(realm.name());
                    errors.push(format!("{}: {}", realm.name(), e));
                }
            }
        }

        let Some((result, origin)) = merged else {
            let reason = errors.join("; ");
            self.report(principal, "", AuthenticationResult::Failure, &reason);
            return Err(AuthError::AllRealmsUnavailable(reason).into());
        };

        let context = match result {
            AuthenticationResult::Success => self.authorize(principal).await,
            other => self.role_modes.context_for(principal, BTreeSet::new(), other),
        };

        if result.is_cacheable() {
            if let Some(cache) = &self.cache {
                cache.put(
                    key,
                    CachedAuth {
                        result,
                        principal: principal.to_string(),
                        realm: origin.to_string(),
                        context: context.clone(),
                    },
                );
            }
        }

        self.report(principal, origin, result, "login");
        metrics::record_login(result.name());
        metrics::record_login_latency(start.elapsed().as_micros() as f64);

        Ok(context)
    }

    /// Build the context for `principal` from the roles every authorization
    /// realm reports. A principal no realm recognizes gets no privileges.
    pub async fn authorize(&self, principal: &str) -> SecurityContext {
        if !self.auth_enabled {
            return SecurityContext::auth_disabled();
        }

        let mut roles: Option<BTreeSet<String>> = None;
        for realm in self.realms.iter().filter(|r| r.capabilities().authorization) {
            match realm.roles_for(principal).await {
                Ok(Some(found)) => roles.get_or_insert_with(BTreeSet::new).extend(found),
                Ok(None) => {}
                Err(e) => {
                    warn!("Realm '{}' failed to authorize '{}': {}", realm.name(), principal, e);
                    metrics::record_realm_error(realm.name());
                }
            }
        }

        match roles {
            Some(roles) => self
                .role_modes
                .context_for(principal, roles, AuthenticationResult::Success),
            None => SecurityContext::unprivileged(principal),
        }
    }

    pub fn clear_auth_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            debug!("Auth cache cleared");
        }
    }

    /// Drop every cached login of `principal`
    pub fn invalidate_principal(&self, principal: &str) {
        if let Some(cache) = &self.cache {
            cache.retain(|_, cached| cached.principal != principal);
        }
    }

    /// Number of live cache entries
    pub fn cached_logins(&self) -> usize {
        self.cache.as_ref().map_or(0, AuthCache::len)
    }

    fn fingerprint(&self, token: &AuthToken) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.fingerprint_key)
            .map_err(|e| Error::Internal(format!("Invalid fingerprint key: {}", e)))?;
        for field in [token.principal(), token.credentials(), token.realm().unwrap_or("")] {
            mac.update(&(field.len() as u64).to_le_bytes());
            mac.update(field.as_bytes());
        }
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn report(&self, principal: &str, realm: &str, result: AuthenticationResult, details: &str) {
        self.audit
            .record(AuditEntry::new(principal, realm, result.name(), details));
    }
}
