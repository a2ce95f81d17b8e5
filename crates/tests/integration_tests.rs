//! Integration tests for Realmgate
//!
//! These tests drive the security core the way an embedding database does:
//! through the security manager, real files on disk and the realm contract.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use realmgate_common::config::{Config, SecurityConfig};
use realmgate_common::error::{AuthError, Error};
use realmgate_security::credential::{Credential, HashAlgorithm};
use realmgate_security::realm::{
    parse_group_mapping, AuthorizationPlugin, DirectoryClient, DirectoryRealm, PluginRealm,
};
use realmgate_security::store::{Record, UserRecord};
use realmgate_security::{
    AccessMode, AuthToken, AuthenticationResult, Collaborators, FakeClock, MemoryAuditSink,
    Permission, Realm, ReloadOutcome, SecurityManager, TokioScheduler,
};

/// Test helper pointing the local realm at a temporary directory
fn test_config(dir: &Path) -> SecurityConfig {
    let mut config = SecurityConfig::default();
    config.local.users_file = dir.join("auth");
    config.local.roles_file = dir.join("roles");
    config.local.groups_file = dir.join("groups");
    config.local.hash_algorithm = "SHA-256".to_string();
    config
}

struct TestSecurity {
    manager: SecurityManager,
    audit: Arc<MemoryAuditSink>,
    clock: Arc<FakeClock>,
    dir: TempDir,
}

/// Test helper to create a security manager with inspectable collaborators
fn create_test_security(
    configure: impl FnOnce(&mut SecurityConfig),
    external: Vec<Arc<dyn Realm>>,
) -> TestSecurity {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = test_config(dir.path());
    configure(&mut config);

    let audit = Arc::new(MemoryAuditSink::new());
    let clock = Arc::new(FakeClock::new(1_000));
    let manager = SecurityManager::with_collaborators(
        &config,
        external,
        Collaborators {
            fs: Arc::new(realmgate_security::store::LocalFileSystem),
            clock: clock.clone(),
            audit: audit.clone(),
        },
    )
    .expect("Failed to create security manager");

    TestSecurity {
        manager,
        audit,
        clock,
        dir,
    }
}

fn user_line(name: &str, password: &str) -> String {
    let credential = Credential::create(password, HashAlgorithm::Sha256).expect("Failed to hash password");
    format!("{}\n", UserRecord::new(name, credential).to_line())
}

// ============================================================================
// Local realm scenarios
// ============================================================================

#[tokio::test]
async fn test_context_descriptions_follow_role_changes() {
    let t = create_test_security(|_| {}, Vec::new());
    let admin = t.manager.user_manager();
    admin.new_user("mats", "abc123", false).unwrap();

    let token = AuthToken::basic("mats", "abc123");
    let ctx = t.manager.login(&token).await.unwrap();
    assert_eq!(ctx.description(), "user 'mats' with no roles");

    admin.new_role("role1", &[]).unwrap();
    admin.add_role_to_user("publisher", "mats").unwrap();
    admin.add_role_to_user("role1", "mats").unwrap();

    let ctx = t.manager.login(&token).await.unwrap();
    assert_eq!(ctx.description(), "user 'mats' with roles [publisher,role1]");
    assert!(ctx.check(Permission::Write).is_ok());

    let restricted = ctx.restrict(AccessMode::READ);
    assert_eq!(
        restricted.description(),
        "user 'mats' with roles [publisher,role1] restricted to READ"
    );
    let denied = restricted.check(Permission::Write).unwrap_err();
    assert_eq!(
        denied.to_string(),
        "Permission denied: Write operations are not allowed for user 'mats' with roles [publisher,role1]."
    );

    let overridden = ctx.override_with(AccessMode::READ);
    assert_eq!(
        overridden.description(),
        "user 'mats' with roles [publisher,role1] overridden by READ"
    );

    let frozen = restricted.freeze();
    assert_eq!(frozen.override_with(AccessMode::FULL), frozen);
}

#[tokio::test]
async fn test_password_change_flow() {
    let t = create_test_security(|_| {}, Vec::new());
    let admin = t.manager.user_manager();
    admin.new_user("neo", "neo", true).unwrap();
    admin.add_role_to_user("admin", "neo").unwrap();

    let ctx = t.manager.login(&AuthToken::basic("neo", "neo")).await.unwrap();
    assert_eq!(ctx.auth_result(), AuthenticationResult::PasswordChangeRequired);
    assert_eq!(ctx.mode(), &AccessMode::CREDENTIALS_EXPIRED);
    assert!(ctx
        .check(Permission::Read)
        .unwrap_err()
        .to_string()
        .contains("must be changed"));

    admin.set_password("neo", "abc123", false).unwrap();
    let ctx = t.manager.login(&AuthToken::basic("neo", "abc123")).await.unwrap();
    assert_eq!(ctx.mode(), &AccessMode::FULL);
    assert!(ctx.is_admin());
}

#[tokio::test]
async fn test_lockout_expires_on_clock() {
    let t = create_test_security(
        |c| {
            c.local.max_failed_attempts = 2;
            c.local.lockout_duration_ms = 1_000;
        },
        Vec::new(),
    );
    t.manager.user_manager().new_user("neo", "abc123", false).unwrap();

    for _ in 0..2 {
        let ctx = t.manager.login(&AuthToken::basic("neo", "nope")).await.unwrap();
        assert_eq!(ctx.auth_result(), AuthenticationResult::Failure);
    }
    let ctx = t.manager.login(&AuthToken::basic("neo", "abc123")).await.unwrap();
    assert_eq!(ctx.auth_result(), AuthenticationResult::TooManyAttempts);

    t.clock.advance(Duration::from_millis(1_000));
    let ctx = t.manager.login(&AuthToken::basic("neo", "abc123")).await.unwrap();
    assert_eq!(ctx.auth_result(), AuthenticationResult::Success);

    let outcomes: Vec<String> = t
        .audit
        .entries_for_subject("neo")
        .into_iter()
        .map(|e| e.outcome)
        .collect();
    assert_eq!(outcomes, vec!["FAILURE", "FAILURE", "TOO_MANY_ATTEMPTS", "SUCCESS"]);
}

#[tokio::test]
async fn test_suspended_user_cannot_login() {
    let t = create_test_security(|_| {}, Vec::new());
    let admin = t.manager.user_manager();
    admin.new_user("mats", "abc123", false).unwrap();
    admin.add_role_to_user("reader", "mats").unwrap();

    let token = AuthToken::basic("mats", "abc123");
    assert_eq!(t.manager.login(&token).await.unwrap().mode(), &AccessMode::READ);

    admin.suspend_user("mats").unwrap();
    let ctx = t.manager.login(&token).await.unwrap();
    assert_eq!(ctx.auth_result(), AuthenticationResult::Failure);
    assert_eq!(t.manager.authorize("mats").await.mode(), &AccessMode::NONE);

    admin.activate_user("mats", false).unwrap();
    assert_eq!(t.manager.login(&token).await.unwrap().mode(), &AccessMode::READ);
}

#[tokio::test]
async fn test_token_from_map() {
    let t = create_test_security(|_| {}, Vec::new());
    t.manager.user_manager().new_user("neo", "abc123", false).unwrap();

    let mut map = HashMap::new();
    map.insert("scheme".to_string(), "basic".to_string());
    map.insert("principal".to_string(), "neo".to_string());
    map.insert("credentials".to_string(), "abc123".to_string());
    let token = AuthToken::from_map(&map).unwrap();
    assert_eq!(
        t.manager.login(&token).await.unwrap().auth_result(),
        AuthenticationResult::Success
    );

    map.insert("scheme".to_string(), "kerberos".to_string());
    assert!(matches!(
        AuthToken::from_map(&map),
        Err(AuthError::AuthTokenInvalid(_))
    ));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(dir.path());

    {
        let manager = SecurityManager::new(&config, Vec::new()).unwrap();
        manager.user_manager().new_user("mats", "abc123", false).unwrap();
        manager.user_manager().add_role_to_user("architect", "mats").unwrap();
    }

    let manager = SecurityManager::new(&config, Vec::new()).unwrap();
    let ctx = manager.login(&AuthToken::basic("mats", "abc123")).await.unwrap();
    assert_eq!(ctx.mode(), &AccessMode::FULL);
    assert!(!ctx.is_admin());

    let roles = std::fs::read_to_string(dir.path().join("roles")).unwrap();
    assert!(roles.contains("architect:mats\n"));
    assert!(!dir.path().join("roles.tmp").exists());
}

#[tokio::test]
async fn test_config_file_drives_manager() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("realmgate.toml");
    let toml = format!(
        r#"
[security]
auth_enabled = true
realms = ["local"]
admin_roles = ["auditor", "admin"]

[security.auth_cache]
enabled = true
ttl_ms = 1000
use_ttl = true
max_capacity = 2

[security.local]
users_file = "{users}"
roles_file = "{roles}"
groups_file = "{groups}"
max_failed_attempts = 5
lockout_duration_ms = 100
hash_algorithm = "SHA-256"

[security.role_modes]
auditor = "READ"
"#,
        users = dir.path().join("auth").display(),
        roles = dir.path().join("roles").display(),
        groups = dir.path().join("groups").display(),
    );
    std::fs::write(&path, toml).unwrap();

    let config = Config::load(&path).await.unwrap();
    let manager = SecurityManager::new(&config.security, Vec::new()).unwrap();

    manager.user_manager().new_user("ann", "pw1", false).unwrap();
    manager.user_manager().new_role("auditor", &["ann"]).unwrap();
    let ctx = manager.login(&AuthToken::basic("ann", "pw1")).await.unwrap();
    assert_eq!(ctx.mode(), &AccessMode::READ);
    assert!(ctx.is_admin());

    // predefined mappings are replaced by the configured table, so the
    // unmapped admin role grants nothing
    manager.user_manager().new_user("bob", "pw2", false).unwrap();
    manager.user_manager().add_role_to_user("admin", "bob").unwrap();
    let ctx = manager.login(&AuthToken::basic("bob", "pw2")).await.unwrap();
    assert_eq!(ctx.mode(), &AccessMode::NONE);
    assert!(!ctx.is_admin());
}

#[tokio::test]
async fn test_auth_disabled() {
    let t = create_test_security(|c| c.auth_enabled = false, Vec::new());
    let ctx = t.manager.login(&AuthToken::basic("anyone", "")).await.unwrap();
    assert_eq!(ctx.description(), "AUTH_DISABLED with FULL");
    assert!(ctx.check(Permission::SchemaWrite).is_ok());
}

// ============================================================================
// Multiple realms
// ============================================================================

struct FakeDirectory {
    passwords: HashMap<String, String>,
    groups: HashMap<String, Vec<String>>,
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn bind(&self, principal: &str, password: &str) -> anyhow::Result<bool> {
        Ok(self.passwords.get(principal).map_or(false, |p| p == password))
    }

    async fn groups_of(&self, principal: &str) -> anyhow::Result<Option<Vec<String>>> {
        Ok(self.groups.get(principal).cloned())
    }
}

struct DownDirectory;

#[async_trait]
impl DirectoryClient for DownDirectory {
    async fn bind(&self, _principal: &str, _password: &str) -> anyhow::Result<bool> {
        anyhow::bail!("connection timed out")
    }

    async fn groups_of(&self, _principal: &str) -> anyhow::Result<Option<Vec<String>>> {
        anyhow::bail!("connection timed out")
    }
}

struct ExtraRoles(HashMap<String, BTreeSet<String>>);

#[async_trait]
impl AuthorizationPlugin for ExtraRoles {
    async fn roles_for(&self, principal: &str) -> anyhow::Result<Option<BTreeSet<String>>> {
        Ok(self.0.get(principal).cloned())
    }
}

fn directory_realm() -> Arc<dyn Realm> {
    let client = FakeDirectory {
        passwords: [("tank".to_string(), "abc123".to_string())].into_iter().collect(),
        groups: [("tank".to_string(), vec!["operators".to_string()])].into_iter().collect(),
    };
    Arc::new(DirectoryRealm::new(
        "ldap",
        Arc::new(client),
        parse_group_mapping("operators=reader").unwrap(),
    ))
}

fn plugin_realm() -> Arc<dyn Realm> {
    let roles: BTreeSet<String> = ["publisher".to_string()].into_iter().collect();
    Arc::new(
        PluginRealm::new("plugin")
            .with_authorization(Arc::new(ExtraRoles([("tank".to_string(), roles)].into_iter().collect()))),
    )
}

#[tokio::test]
async fn test_directory_login_with_roles_from_all_realms() {
    let t = create_test_security(
        |c| c.realms = vec!["local".to_string(), "ldap".to_string(), "plugin".to_string()],
        vec![directory_realm(), plugin_realm()],
    );

    let ctx = t.manager.login(&AuthToken::basic("tank", "abc123")).await.unwrap();
    assert_eq!(ctx.auth_result(), AuthenticationResult::Success);
    assert_eq!(ctx.description(), "user 'tank' with roles [publisher,reader]");
    assert_eq!(ctx.mode(), &AccessMode::TOKEN_WRITE);

    let entries = t.audit.entries_for_subject("tank");
    assert_eq!(entries.last().unwrap().realm, "ldap");
}

#[tokio::test]
async fn test_local_success_is_not_downgraded_by_other_realms() {
    let t = create_test_security(
        |c| c.realms = vec!["ldap".to_string(), "local".to_string()],
        vec![directory_realm()],
    );
    t.manager.user_manager().new_user("tank", "local-pw", false).unwrap();

    let ctx = t.manager.login(&AuthToken::basic("tank", "local-pw")).await.unwrap();
    assert_eq!(ctx.auth_result(), AuthenticationResult::Success);
    // local knows tank without roles, the directory maps operators to reader
    assert_eq!(ctx.roles().iter().collect::<Vec<_>>(), vec!["reader"]);
}

#[tokio::test]
async fn test_unreachable_directory_alone_is_unavailable() {
    let down: Arc<dyn Realm> = Arc::new(DirectoryRealm::new(
        "ldap",
        Arc::new(DownDirectory),
        Default::default(),
    ));
    let t = create_test_security(|c| c.realms = vec!["ldap".to_string()], vec![down]);

    let err = t.manager.login(&AuthToken::basic("tank", "abc123")).await.unwrap_err();
    match err {
        Error::Auth(AuthError::AllRealmsUnavailable(reason)) => {
            assert!(reason.contains("connection timed out"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

// ============================================================================
// Hot reload
// ============================================================================

#[tokio::test]
async fn test_external_edits_are_picked_up() {
    let t = create_test_security(|_| {}, Vec::new());
    t.manager.user_manager().new_user("neo", "abc123", false).unwrap();

    let token = AuthToken::basic("neo", "abc123");
    t.manager.login(&token).await.unwrap();
    assert_eq!(t.manager.coordinator().cached_logins(), 1);

    // an administrative tool rewrites both files
    let users = format!("{}{}", user_line("neo", "abc123"), user_line("trinity", "xyz"));
    std::fs::write(t.dir.path().join("auth"), users).unwrap();
    std::fs::write(
        t.dir.path().join("roles"),
        "admin:trinity\narchitect:\npublisher:\nreader:neo\n",
    )
    .unwrap();

    let reload = t.manager.reload_loop();
    assert_eq!(reload.tick().unwrap(), ReloadOutcome::Reloaded);
    assert_eq!(t.manager.coordinator().cached_logins(), 0);

    let ctx = t.manager.login(&AuthToken::basic("trinity", "xyz")).await.unwrap();
    assert!(ctx.is_admin());
    let ctx = t.manager.login(&token).await.unwrap();
    assert_eq!(ctx.mode(), &AccessMode::READ);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_reload_gives_up_on_broken_files() {
    let t = create_test_security(
        |c| {
            c.reload.initial_delay_ms = 10;
            c.reload.period_ms = 10;
            c.reload.max_attempts = 3;
        },
        Vec::new(),
    );
    t.manager.user_manager().new_user("neo", "abc123", false).unwrap();
    std::fs::write(t.dir.path().join("roles"), "admin:neo\nreader:morpheus\n").unwrap();

    let fatal = Arc::new(std::sync::Mutex::new(Vec::new()));
    let scheduler = TokioScheduler::current().unwrap();
    let handle = {
        let fatal = fatal.clone();
        t.manager
            .start_reload(&scheduler, move |e| fatal.lock().unwrap().push(e.to_string()))
            .unwrap()
            .expect("reload is enabled")
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.is_finished());

    let fatal = fatal.lock().unwrap();
    assert_eq!(fatal.len(), 1);
    assert_eq!(
        fatal[0],
        "Unable to reload auth files after 3 consecutive attempts: role 'reader' references unknown user 'morpheus'"
    );

    // the last good state is still served
    let ctx = t.manager.login(&AuthToken::basic("neo", "abc123")).await.unwrap();
    assert_eq!(ctx.description(), "user 'neo' with no roles");
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_and_administration() {
    let t = Arc::new(create_test_security(|_| {}, Vec::new()));
    for i in 0..8 {
        t.manager
            .user_manager()
            .new_user(&format!("user{}", i), "pw", false)
            .unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..8 {
        let t = t.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("user{}", i);
            for round in 0..10 {
                let ctx = t.manager.login(&AuthToken::basic(name.as_str(), "pw")).await.unwrap();
                assert_eq!(ctx.auth_result(), AuthenticationResult::Success);
                if round % 2 == 0 {
                    t.manager.user_manager().add_role_to_user("reader", &name).unwrap();
                } else {
                    t.manager.user_manager().remove_role_from_user("reader", &name).unwrap();
                }
            }
            t.manager.user_manager().add_role_to_user("publisher", &name).unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let publishers = t.manager.user_manager().users_for_role("publisher").unwrap();
    assert_eq!(publishers.len(), 8);
    assert!(t.manager.user_manager().users_for_role("reader").unwrap().is_empty());
}
