//! Access modes: the permission set a session runs with
//!
//! A mode is either one of the named [`StaticMode`] levels or a composite
//! built by restricting or overriding another mode. Composites keep their
//! operands and evaluate by delegation, so descriptions can be rendered from
//! the operands as well.

use std::fmt;
use std::sync::Arc;

use realmgate_common::error::AuthError;

/// A single operation class guarded by an access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    TokenWrite,
    SchemaWrite,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::Read,
        Permission::Write,
        Permission::TokenWrite,
        Permission::SchemaWrite,
    ];

    fn label(self) -> &'static str {
        match self {
            Permission::Read => "Read",
            Permission::Write => "Write",
            Permission::TokenWrite => "Token create",
            Permission::SchemaWrite => "Schema",
        }
    }
}

/// Named base access levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StaticMode {
    None,
    Read,
    Write,
    TokenWrite,
    Full,
    CredentialsExpired,
}

impl StaticMode {
    pub const ALL: [StaticMode; 6] = [
        StaticMode::None,
        StaticMode::Read,
        StaticMode::Write,
        StaticMode::TokenWrite,
        StaticMode::Full,
        StaticMode::CredentialsExpired,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StaticMode::None => "NONE",
            StaticMode::Read => "READ",
            StaticMode::Write => "WRITE",
            StaticMode::TokenWrite => "TOKEN_WRITE",
            StaticMode::Full => "FULL",
            StaticMode::CredentialsExpired => "CREDENTIALS_EXPIRED",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.name().eq_ignore_ascii_case(name))
    }

    pub fn allows(self, permission: Permission) -> bool {
        match self {
            StaticMode::None | StaticMode::CredentialsExpired => false,
            StaticMode::Read => permission == Permission::Read,
            StaticMode::Write => matches!(permission, Permission::Read | Permission::Write),
            StaticMode::TokenWrite => permission != Permission::SchemaWrite,
            StaticMode::Full => true,
        }
    }

    /// The weakest static mode granting everything either operand grants.
    ///
    /// NONE < READ < WRITE < TOKEN_WRITE < FULL form a chain, so the union of
    /// two of them is always one of them. CREDENTIALS_EXPIRED grants nothing.
    pub fn union(self, other: StaticMode) -> StaticMode {
        match (self, other) {
            (StaticMode::CredentialsExpired, m) | (m, StaticMode::CredentialsExpired) => m,
            (a, b) => a.max(b),
        }
    }
}

impl fmt::Display for StaticMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable capability value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessMode {
    Static(StaticMode),
    /// Grants a permission only when both operands grant it
    Restricted {
        base: Arc<AccessMode>,
        limiter: Arc<AccessMode>,
    },
    /// Grants a permission when the override grants it, otherwise defers to the base
    Overridden {
        base: Arc<AccessMode>,
        overriding: Arc<AccessMode>,
    },
}

impl AccessMode {
    pub const NONE: AccessMode = AccessMode::Static(StaticMode::None);
    pub const READ: AccessMode = AccessMode::Static(StaticMode::Read);
    pub const WRITE: AccessMode = AccessMode::Static(StaticMode::Write);
    pub const TOKEN_WRITE: AccessMode = AccessMode::Static(StaticMode::TokenWrite);
    pub const FULL: AccessMode = AccessMode::Static(StaticMode::Full);
    pub const CREDENTIALS_EXPIRED: AccessMode = AccessMode::Static(StaticMode::CredentialsExpired);

    pub fn allows(&self, permission: Permission) -> bool {
        match self {
            AccessMode::Static(mode) => mode.allows(permission),
            AccessMode::Restricted { base, limiter } => {
                base.allows(permission) && limiter.allows(permission)
            }
            AccessMode::Overridden { base, overriding } => {
                overriding.allows(permission) || base.allows(permission)
            }
        }
    }

    /// Limit this mode to what `limiter` also grants.
    ///
    /// Restricting twice by the same limiter yields the first composite.
    #[must_use]
    pub fn restrict(self, limiter: AccessMode) -> AccessMode {
        if let AccessMode::Restricted { limiter: current, .. } = &self {
            if **current == limiter {
                return self;
            }
        }
        AccessMode::Restricted {
            base: Arc::new(self),
            limiter: Arc::new(limiter),
        }
    }

    /// Extend this mode with whatever `overriding` grants.
    ///
    /// Overriding twice by the same mode yields the first composite.
    #[must_use]
    pub fn override_with(self, overriding: AccessMode) -> AccessMode {
        if let AccessMode::Overridden { overriding: current, .. } = &self {
            if **current == overriding {
                return self;
            }
        }
        AccessMode::Overridden {
            base: Arc::new(self),
            overriding: Arc::new(overriding),
        }
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self, AccessMode::Static(_))
    }

    /// The innermost base mode
    pub fn root(&self) -> StaticMode {
        match self {
            AccessMode::Static(mode) => *mode,
            AccessMode::Restricted { base, .. } | AccessMode::Overridden { base, .. } => base.root(),
        }
    }

    pub fn name(&self) -> String {
        self.describe_with(self.root().name())
    }

    /// Render this mode with `base` standing in for the innermost base mode.
    pub fn describe_with(&self, base: &str) -> String {
        match self {
            AccessMode::Static(_) => base.to_string(),
            AccessMode::Restricted { base: inner, limiter } => {
                format!("{} restricted to {}", inner.describe_with(base), limiter.name())
            }
            AccessMode::Overridden { base: inner, overriding } => {
                format!("{} overridden by {}", inner.describe_with(base), overriding.name())
            }
        }
    }

    /// Fail with `PermissionDenied` unless `permission` is granted.
    pub fn check(&self, permission: Permission, subject: &str) -> Result<(), AuthError> {
        if self.allows(permission) {
            return Ok(());
        }
        if self.root() == StaticMode::CredentialsExpired {
            return Err(AuthError::PermissionDenied(
                "The credentials you provided were valid, but must be changed before you can use this instance."
                    .to_string(),
            ));
        }
        Err(AuthError::PermissionDenied(format!(
            "{} operations are not allowed for {}.",
            permission.label(),
            subject
        )))
    }
}

impl From<StaticMode> for AccessMode {
    fn from(mode: StaticMode) -> Self {
        AccessMode::Static(mode)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
