//! Realm adapter for a directory service
//!
//! The directory protocol itself lives behind [`DirectoryClient`]. This
//! adapter turns binds into authentication results and directory groups into
//! roles.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use realmgate_common::error::{Error, Result};

use crate::auth_result::AuthenticationResult;
use crate::realm::{Realm, RealmCapabilities};
use crate::token::AuthToken;

/// Client for a directory server
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Try to bind as `principal`. `Ok(false)` means the directory rejected
    /// the credentials.
    async fn bind(&self, principal: &str, password: &str) -> anyhow::Result<bool>;

    /// Groups `principal` belongs to, `None` if the directory has no such entry
    async fn groups_of(&self, principal: &str) -> anyhow::Result<Option<Vec<String>>>;
}

/// Parse `group=role1,role2;other group=role3`.
///
/// Group names may themselves contain `=`; the last `=` of each entry
/// separates the group from its roles.
pub fn parse_group_mapping(text: &str) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut mapping: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for entry in text.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (group, roles) = entry
            .rsplit_once('=')
            .ok_or_else(|| Error::Config(format!("Invalid group to role mapping '{}'", entry)))?;
        let group = group.trim().trim_matches('"');
        if group.is_empty() {
            return Err(Error::Config(format!("Missing group name in '{}'", entry)));
        }
        mapping
            .entry(group.to_string())
            .or_default()
            .extend(roles.split(',').map(str::trim).filter(|r| !r.is_empty()).map(String::from));
    }
    Ok(mapping)
}

pub struct DirectoryRealm {
    name: String,
    client: Arc<dyn DirectoryClient>,
    group_to_roles: BTreeMap<String, BTreeSet<String>>,
    capabilities: RealmCapabilities,
}

impl DirectoryRealm {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn DirectoryClient>,
        group_to_roles: BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            group_to_roles,
            capabilities: RealmCapabilities::BOTH,
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: RealmCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn unavailable(&self, e: &anyhow::Error) -> Error {
        Error::Internal(format!("Directory realm '{}' unavailable: {}", self.name, e))
    }
}

#[async_trait]
impl Realm for DirectoryRealm {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> RealmCapabilities {
        self.capabilities
    }

    async fn authenticate(&self, token: &AuthToken) -> Result<AuthenticationResult> {
        let bound = self
            .client
            .bind(token.principal(), token.credentials())
            .await
            .map_err(|e| self.unavailable(&e))?;

        debug!("Directory bind for '{}' in realm '{}': {}", token.principal(), self.name, bound);
        Ok(if bound {
            AuthenticationResult::Success
        } else {
            AuthenticationResult::Failure
        })
    }

    async fn roles_for(&self, principal: &str) -> Result<Option<BTreeSet<String>>> {
        let groups = self
            .client
            .groups_of(principal)
            .await
            .map_err(|e| self.unavailable(&e))?;

        Ok(groups.map(|groups| {
            groups
                .iter()
                .filter_map(|group| self.group_to_roles.get(group))
                .flatten()
                .cloned()
                .collect()
        }))
    }
}
