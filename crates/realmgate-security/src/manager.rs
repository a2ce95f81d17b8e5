//! Security manager: wires stores, realms, coordinator and reload together

use std::sync::Arc;

use tracing::{info, warn};

use realmgate_common::config::SecurityConfig;
use realmgate_common::error::{Error, ReloadError, Result};

use crate::admin::UserManager;
use crate::audit::{AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::context::SecurityContext;
use crate::coordinator::RealmCoordinator;
use crate::credential::HashAlgorithm;
use crate::realm::local::LOCAL_REALM_NAME;
use crate::realm::{LocalRealm, Realm};
use crate::reload::HotReloadLoop;
use crate::scheduler::{JobHandle, Scheduler};
use crate::store::{FileSystem, GroupStore, LocalFileSystem, RoleStore, UserStore};
use crate::token::AuthToken;

/// Replaceable collaborators of the security core
#[derive(Clone)]
pub struct Collaborators {
    pub fs: Arc<dyn FileSystem>,
    pub clock: Arc<dyn Clock>,
    pub audit: Arc<dyn AuditSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            fs: Arc::new(LocalFileSystem),
            clock: Arc::new(SystemClock),
            audit: Arc::new(TracingAuditSink),
        }
    }
}

/// Main security manager
pub struct SecurityManager {
    config: SecurityConfig,
    local: Arc<LocalRealm>,
    coordinator: Arc<RealmCoordinator>,
    users: UserManager,
    reload: Arc<HotReloadLoop>,
}

impl SecurityManager {
    /// Create a security manager with the default collaborators.
    ///
    /// `external` holds directory or plugin realms; they take part only if
    /// `config.realms` lists them.
    pub fn new(config: &SecurityConfig, external: Vec<Arc<dyn Realm>>) -> Result<Self> {
        Self::with_collaborators(config, external, Collaborators::default())
    }

    pub fn with_collaborators(
        config: &SecurityConfig,
        external: Vec<Arc<dyn Realm>>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        info!("Initializing security manager");
        config.validate()?;

        let Collaborators { fs, clock, audit } = collaborators;
        let local_config = &config.local;
        let users = Arc::new(UserStore::open(&local_config.users_file, fs.clone())?);
        let roles = Arc::new(RoleStore::open(&local_config.roles_file, fs.clone())?);
        let groups = Arc::new(GroupStore::open(&local_config.groups_file, fs)?);

        let local = Arc::new(LocalRealm::new(
            users.clone(),
            roles.clone(),
            local_config,
            clock.clone(),
        ));

        let mut realms: Vec<Arc<dyn Realm>> = Vec::with_capacity(config.realms.len());
        for name in &config.realms {
            if name == LOCAL_REALM_NAME {
                realms.push(local.clone());
                continue;
            }
            let realm = external
                .iter()
                .find(|realm| realm.name() == name)
                .ok_or_else(|| Error::Config(format!("Unknown realm '{}'", name)))?;
            realms.push(realm.clone());
        }
        for realm in &external {
            if !config.realms.iter().any(|name| name == realm.name()) {
                warn!("Realm '{}' is not listed in the realm order and will not be used", realm.name());
            }
        }

        let coordinator = Arc::new(RealmCoordinator::new(config, realms, audit, clock)?);

        let algorithm: HashAlgorithm = local_config.hash_algorithm.parse()?;
        let user_manager = UserManager::new(users.clone(), roles.clone(), groups, algorithm)
            .with_coordinator(coordinator.clone())
            .with_local_realm(local.clone());
        user_manager.ensure_predefined_roles()?;

        let reload = Arc::new(HotReloadLoop::new(users, roles, config.reload.max_attempts));
        {
            let coordinator = coordinator.clone();
            reload.on_reload(move || coordinator.clear_auth_cache());
        }

        Ok(Self {
            config: config.clone(),
            local,
            coordinator,
            users: user_manager,
            reload,
        })
    }

    pub async fn login(&self, token: &AuthToken) -> Result<SecurityContext> {
        self.coordinator.login(token).await
    }

    pub async fn authorize(&self, principal: &str) -> SecurityContext {
        self.coordinator.authorize(principal).await
    }

    pub fn coordinator(&self) -> &Arc<RealmCoordinator> {
        &self.coordinator
    }

    pub fn local_realm(&self) -> &Arc<LocalRealm> {
        &self.local
    }

    pub fn user_manager(&self) -> &UserManager {
        &self.users
    }

    pub fn reload_loop(&self) -> &Arc<HotReloadLoop> {
        &self.reload
    }

    /// Start polling the local files if reload is enabled
    pub fn start_reload(
        &self,
        scheduler: &dyn Scheduler,
        on_fatal: impl Fn(ReloadError) + Send + Sync + 'static,
    ) -> Result<Option<JobHandle>> {
        if !self.config.reload.enabled {
            info!("Auth file reload disabled");
            return Ok(None);
        }
        self.reload
            .start(scheduler, &self.config.reload, on_fatal)
            .map(Some)
    }
}
