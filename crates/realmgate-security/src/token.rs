//! Login tokens

use std::collections::HashMap;
use std::fmt;

use realmgate_common::error::AuthError;

pub const SCHEME_KEY: &str = "scheme";
pub const PRINCIPAL_KEY: &str = "principal";
pub const CREDENTIALS_KEY: &str = "credentials";
pub const REALM_KEY: &str = "realm";

pub const BASIC_SCHEME: &str = "basic";

/// A credential presentation as handed over by the session layer
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    principal: String,
    credentials: String,
    realm: Option<String>,
}

impl AuthToken {
    /// Basic username/password token, valid for every realm
    pub fn basic(principal: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            credentials: credentials.into(),
            realm: None,
        }
    }

    /// Limit the token to a single named realm
    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Parse the key/value form used on the wire.
    ///
    /// A missing scheme defaults to `basic`. An empty realm means unscoped.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, AuthError> {
        let scheme = map.get(SCHEME_KEY).map_or(BASIC_SCHEME, String::as_str);
        if scheme != BASIC_SCHEME {
            return Err(AuthError::AuthTokenInvalid(format!(
                "Unsupported authentication scheme '{}'",
                scheme
            )));
        }

        let principal = map.get(PRINCIPAL_KEY).ok_or_else(|| {
            AuthError::AuthTokenInvalid(format!("Missing key '{}'", PRINCIPAL_KEY))
        })?;
        let credentials = map.get(CREDENTIALS_KEY).ok_or_else(|| {
            AuthError::AuthTokenInvalid(format!("Missing key '{}'", CREDENTIALS_KEY))
        })?;

        let token = Self {
            principal: principal.clone(),
            credentials: credentials.clone(),
            realm: map.get(REALM_KEY).filter(|r| !r.is_empty()).cloned(),
        };
        token.validate()?;
        Ok(token)
    }

    /// Structural checks done before any realm sees the token
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.principal.trim().is_empty() {
            return Err(AuthError::AuthTokenInvalid("Principal must not be empty".to_string()));
        }
        if self.principal.contains(['\n', '\r', '\0']) {
            return Err(AuthError::AuthTokenInvalid(
                "Principal contains control characters".to_string(),
            ));
        }
        Ok(())
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn credentials(&self) -> &str {
        &self.credentials
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("principal", &self.principal)
            .field("credentials", &"******")
            .field("realm", &self.realm)
            .finish()
    }
}
