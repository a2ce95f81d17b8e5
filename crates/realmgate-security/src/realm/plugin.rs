//! Realm assembled from user supplied plugins

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use realmgate_common::error::{Error, Result};

use crate::auth_result::AuthenticationResult;
use crate::realm::{Realm, RealmCapabilities};
use crate::token::AuthToken;

#[async_trait]
pub trait AuthenticationPlugin: Send + Sync {
    async fn authenticate(&self, principal: &str, credentials: &str) -> anyhow::Result<AuthenticationResult>;
}

#[async_trait]
pub trait AuthorizationPlugin: Send + Sync {
    async fn roles_for(&self, principal: &str) -> anyhow::Result<Option<BTreeSet<String>>>;
}

/// Capabilities follow from which plugins are installed
pub struct PluginRealm {
    name: String,
    authentication: Option<Arc<dyn AuthenticationPlugin>>,
    authorization: Option<Arc<dyn AuthorizationPlugin>>,
}

impl PluginRealm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authentication: None,
            authorization: None,
        }
    }

    #[must_use]
    pub fn with_authentication(mut self, plugin: Arc<dyn AuthenticationPlugin>) -> Self {
        self.authentication = Some(plugin);
        self
    }

    #[must_use]
    pub fn with_authorization(mut self, plugin: Arc<dyn AuthorizationPlugin>) -> Self {
        self.authorization = Some(plugin);
        self
    }

    fn plugin_error(&self, e: &anyhow::Error) -> Error {
        Error::Internal(format!("Plugin realm '{}' failed: {}", self.name, e))
    }
}

#[async_trait]
impl Realm for PluginRealm {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> RealmCapabilities {
        RealmCapabilities {
            authentication: self.authentication.is_some(),
            authorization: self.authorization.is_some(),
        }
    }

    async fn authenticate(&self, token: &AuthToken) -> Result<AuthenticationResult> {
        let Some(plugin) = &self.authentication else {
            return Err(Error::Internal(format!(
                "Plugin realm '{}' has no authentication plugin",
                self.name
            )));
        };
        plugin
            .authenticate(token.principal(), token.credentials())
            .await
            .map_err(|e| self.plugin_error(&e))
    }

    async fn roles_for(&self, principal: &str) -> Result<Option<BTreeSet<String>>> {
        let Some(plugin) = &self.authorization else {
            return Err(Error::Internal(format!(
                "Plugin realm '{}' has no authorization plugin",
                self.name
            )));
        };
        plugin.roles_for(principal).await.map_err(|e| self.plugin_error(&e))
    }
}
