//! Security contexts handed to the execution layer

use std::collections::BTreeSet;

use realmgate_common::error::AuthError;

use crate::access_mode::{AccessMode, Permission};
use crate::auth_result::AuthenticationResult;

/// Who a context speaks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    User(String),
    AuthDisabled,
}

/// Subject, roles and the composed access mode of one session.
///
/// Contexts are values: composition returns a new context. A frozen context
/// ignores further composition and returns itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    subject: Subject,
    roles: BTreeSet<String>,
    mode: AccessMode,
    admin: bool,
    frozen: bool,
    auth_result: AuthenticationResult,
}

impl SecurityContext {
    pub fn new(
        username: impl Into<String>,
        roles: BTreeSet<String>,
        mode: AccessMode,
        admin: bool,
    ) -> Self {
        Self {
            subject: Subject::User(username.into()),
            roles,
            mode,
            admin,
            frozen: false,
            auth_result: AuthenticationResult::Success,
        }
    }

    /// A known or unknown principal holding no privileges
    pub fn unprivileged(username: impl Into<String>) -> Self {
        Self::new(username, BTreeSet::new(), AccessMode::NONE, false)
    }

    /// The context used for every session when authentication is switched off
    pub fn auth_disabled() -> Self {
        Self {
            subject: Subject::AuthDisabled,
            roles: BTreeSet::new(),
            mode: AccessMode::FULL,
            admin: true,
            frozen: false,
            auth_result: AuthenticationResult::Success,
        }
    }

    #[must_use]
    pub(crate) fn with_auth_result(mut self, result: AuthenticationResult) -> Self {
        self.auth_result = result;
        self
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn username(&self) -> Option<&str> {
        match &self.subject {
            Subject::User(name) => Some(name),
            Subject::AuthDisabled => None,
        }
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn mode(&self) -> &AccessMode {
        &self.mode
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn auth_result(&self) -> AuthenticationResult {
        self.auth_result
    }

    /// Replace the access mode. No-op on a frozen context.
    #[must_use]
    pub fn with_mode(&self, mode: AccessMode) -> SecurityContext {
        if self.frozen {
            return self.clone();
        }
        Self {
            mode,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn restrict(&self, limiter: AccessMode) -> SecurityContext {
        self.with_mode(self.mode.clone().restrict(limiter))
    }

    #[must_use]
    pub fn override_with(&self, overriding: AccessMode) -> SecurityContext {
        self.with_mode(self.mode.clone().override_with(overriding))
    }

    /// A copy that rejects further composition
    #[must_use]
    pub fn freeze(&self) -> SecurityContext {
        Self {
            frozen: true,
            ..self.clone()
        }
    }

    pub fn check(&self, permission: Permission) -> Result<(), AuthError> {
        self.mode.check(permission, &self.subject_description())
    }

    fn subject_description(&self) -> String {
        match &self.subject {
            Subject::AuthDisabled => format!("AUTH_DISABLED with {}", self.mode.root().name()),
            Subject::User(name) if self.roles.is_empty() => format!("user '{}' with no roles", name),
            Subject::User(name) => {
                let roles: Vec<&str> = self.roles.iter().map(String::as_str).collect();
                format!("user '{}' with roles [{}]", name, roles.join(","))
            }
        }
    }

    pub fn description(&self) -> String {
        self.mode.describe_with(&self.subject_description())
    }
}
