//! Identity backends

use std::collections::BTreeSet;

use async_trait::async_trait;

use realmgate_common::error::{Error, Result};

use crate::auth_result::AuthenticationResult;
use crate::token::AuthToken;

pub mod directory;
pub mod local;
pub mod plugin;

pub use directory::{parse_group_mapping, DirectoryClient, DirectoryRealm};
pub use local::LocalRealm;
pub use plugin::{AuthenticationPlugin, AuthorizationPlugin, PluginRealm};

/// Which halves of the realm contract a backend implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RealmCapabilities {
    pub authentication: bool,
    pub authorization: bool,
}

impl RealmCapabilities {
    pub const BOTH: RealmCapabilities = RealmCapabilities {
        authentication: true,
        authorization: true,
    };
    pub const AUTHENTICATION: RealmCapabilities = RealmCapabilities {
        authentication: true,
        authorization: false,
    };
    pub const AUTHORIZATION: RealmCapabilities = RealmCapabilities {
        authentication: false,
        authorization: true,
    };
}

/// An identity backend.
///
/// An `Err` from either method means the realm could not answer; a definitive
/// rejection is `Ok(AuthenticationResult::Failure)`.
#[async_trait]
pub trait Realm: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> RealmCapabilities;

    /// Only called when `capabilities().authentication` is set
    async fn authenticate(&self, token: &AuthToken) -> Result<AuthenticationResult> {
        let _ = token;
        Err(unsupported(self.name(), "authentication"))
    }

    /// Roles held by `principal`, or `None` if the realm does not know it.
    /// Only called when `capabilities().authorization` is set.
    async fn roles_for(&self, principal: &str) -> Result<Option<BTreeSet<String>>> {
        let _ = principal;
        Err(unsupported(self.name(), "authorization"))
    }
}

fn unsupported(realm: &str, capability: &str) -> Error {
    Error::Internal(format!("Realm '{}' does not support {}", realm, capability))
}
