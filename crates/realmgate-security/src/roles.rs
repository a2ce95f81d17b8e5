//! Predefined roles and the role to access mode mapping

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;

use realmgate_common::error::{Error, Result};

use crate::access_mode::{AccessMode, StaticMode};
use crate::auth_result::AuthenticationResult;
use crate::context::SecurityContext;

pub const ADMIN: &str = "admin";
pub const ARCHITECT: &str = "architect";
pub const PUBLISHER: &str = "publisher";
pub const READER: &str = "reader";

pub const PREDEFINED_ROLES: [&str; 4] = [ADMIN, ARCHITECT, PUBLISHER, READER];

static PREDEFINED_MODES: Lazy<BTreeMap<String, StaticMode>> = Lazy::new(|| {
    [
        (ADMIN, StaticMode::Full),
        (ARCHITECT, StaticMode::Full),
        (PUBLISHER, StaticMode::TokenWrite),
        (READER, StaticMode::Read),
    ]
    .into_iter()
    .map(|(role, mode)| (role.to_string(), mode))
    .collect()
});

pub fn is_predefined(role: &str) -> bool {
    PREDEFINED_ROLES.contains(&role)
}

/// Maps role names to base modes. Roles without an entry grant nothing.
///
/// Holding a mapped admin role marks the context as administrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleModeMapping {
    modes: BTreeMap<String, StaticMode>,
    admin_roles: BTreeSet<String>,
}

impl Default for RoleModeMapping {
    fn default() -> Self {
        Self {
            modes: PREDEFINED_MODES.clone(),
            admin_roles: BTreeSet::from([ADMIN.to_string()]),
        }
    }
}

impl RoleModeMapping {
    /// Build from `role -> mode name` pairs, rejecting unknown mode names
    pub fn from_config(role_modes: &BTreeMap<String, String>) -> Result<Self> {
        let modes = role_modes
            .iter()
            .map(|(role, mode)| {
                StaticMode::from_name(mode)
                    .map(|mode| (role.clone(), mode))
                    .ok_or_else(|| {
                        Error::Validation(format!("Unknown access mode '{}' for role '{}'", mode, role))
                    })
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            modes,
            admin_roles: BTreeSet::from([ADMIN.to_string()]),
        })
    }

    /// Replace the admin roles
    #[must_use]
    pub fn with_admin_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admin_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// True if any of `roles` is an admin role with a mode entry
    pub fn grants_admin(&self, roles: &BTreeSet<String>) -> bool {
        roles
            .iter()
            .any(|role| self.admin_roles.contains(role) && self.modes.contains_key(role))
    }

    pub fn mode_for(&self, role: &str) -> StaticMode {
        self.modes.get(role).copied().unwrap_or(StaticMode::None)
    }

    /// Strongest mode granted by any of `roles`
    pub fn mode_for_roles<'a>(&self, roles: impl IntoIterator<Item = &'a String>) -> AccessMode {
        roles
            .into_iter()
            .map(|role| self.mode_for(role))
            .fold(StaticMode::None, StaticMode::union)
            .into()
    }

    /// Build the context for a principal after authentication
    pub fn context_for(
        &self,
        principal: &str,
        roles: BTreeSet<String>,
        result: AuthenticationResult,
    ) -> SecurityContext {
        match result {
            AuthenticationResult::Success => {
                let mode = self.mode_for_roles(&roles);
                let admin = self.grants_admin(&roles);
                SecurityContext::new(principal, roles, mode, admin)
            }
            AuthenticationResult::PasswordChangeRequired => {
                SecurityContext::new(principal, BTreeSet::new(), AccessMode::CREDENTIALS_EXPIRED, false)
                    .with_auth_result(result)
            }
            AuthenticationResult::Failure | AuthenticationResult::TooManyAttempts => {
                SecurityContext::unprivileged(principal).with_auth_result(result)
            }
        }
    }
}
