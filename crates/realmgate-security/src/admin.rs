//! User, role and group administration for the local realm
//!
//! Every mutation is a read followed by a compare-and-swap update against the
//! record stores, retried when another writer got there first. Changes that
//! depend on a user existing in one store while editing another are also
//! serialized by the manager, so a deleted user never lingers in a role.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::info;

use realmgate_common::error::{AuthError, Error, Result, StoreError};

use crate::coordinator::RealmCoordinator;
use crate::credential::{Credential, HashAlgorithm};
use crate::realm::LocalRealm;
use crate::roles::{is_predefined, PREDEFINED_ROLES};
use crate::store::{
    GroupRecord, GroupStore, Membership, Record, RecordStore, RoleRecord, RoleStore, UserRecord, UserStore,
    IS_SUSPENDED, PASSWORD_CHANGE_REQUIRED,
};

pub struct UserManager {
    users: Arc<UserStore>,
    roles: Arc<RoleStore>,
    groups: Arc<GroupStore>,
    hash_algorithm: HashAlgorithm,
    coordinator: Option<Arc<RealmCoordinator>>,
    realm: Option<Arc<LocalRealm>>,
    /// Held by changes spanning the user store and the role or group store
    membership: Mutex<()>,
}

impl UserManager {
    pub fn new(
        users: Arc<UserStore>,
        roles: Arc<RoleStore>,
        groups: Arc<GroupStore>,
        hash_algorithm: HashAlgorithm,
    ) -> Self {
        Self {
            users,
            roles,
            groups,
            hash_algorithm,
            coordinator: None,
            realm: None,
            membership: Mutex::new(()),
        }
    }

    /// Invalidate cached logins through `coordinator` after each change
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<RealmCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Lift lockouts in `realm` when a password is reset or a user reactivated
    #[must_use]
    pub fn with_local_realm(mut self, realm: Arc<LocalRealm>) -> Self {
        self.realm = Some(realm);
        self
    }

    /// Create any missing predefined role
    pub fn ensure_predefined_roles(&self) -> Result<()> {
        for role in PREDEFINED_ROLES {
            match self.roles.create(RoleRecord::new(role, Vec::<String>::new())) {
                Ok(()) => info!("Created predefined role '{}'", role),
                Err(Error::Store(StoreError::NameAlreadyExists(_))) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn membership_lock(&self) -> MutexGuard<'_, ()> {
        self.membership.lock()
    }

    fn changed(&self, principal: &str) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.invalidate_principal(principal);
        }
    }

    fn credential(&self, password: &str) -> Result<Credential> {
        if password.is_empty() {
            return Err(Error::Validation("A password cannot be empty.".to_string()));
        }
        Credential::create(password, self.hash_algorithm)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn new_user(&self, username: &str, password: &str, require_password_change: bool) -> Result<UserRecord> {
        let mut user = UserRecord::new(username, self.credential(password)?);
        if require_password_change {
            user = user.with_flag(PASSWORD_CHANGE_REQUIRED);
        }
        self.users.create(user.clone())?;
        info!("Created user '{}'", username);
        Ok(user)
    }

    pub fn get_user(&self, username: &str) -> Result<UserRecord> {
        self.users.find_by_name(username).ok_or_else(|| user_not_found(username))
    }

    /// Delete a user and drop it from every role and group
    pub fn delete_user(&self, username: &str) -> Result<()> {
        let _membership = self.membership_lock();
        let user = self.get_user(username)?;

        for role in self.roles.names_containing(username) {
            modify(&self.roles, &role, role_not_found, |r| {
                r.users().contains(username).then(|| r.without_user(username))
            })?;
        }
        for group in self.groups.names_containing(username) {
            self.remove_group_member(&group, username)?;
        }

        if !self.users.delete(&user)? {
            return Err(user_not_found(username));
        }
        self.changed(username);
        if let Some(realm) = &self.realm {
            realm.reset_attempts(username);
        }
        info!("Deleted user '{}'", username);
        Ok(())
    }

    /// Replace the password. `require_change` sets or clears the
    /// password-change-required flag.
    pub fn set_password(&self, username: &str, password: &str, require_change: bool) -> Result<()> {
        let credential = self.credential(password)?;
        if self.get_user(username)?.credential().matches(password) {
            return Err(Error::Validation(
                "Old password and new password cannot be the same.".to_string(),
            ));
        }

        modify(&self.users, username, user_not_found, |user| {
            let user = user.with_credential(credential.clone());
            Some(if require_change {
                user.with_flag(PASSWORD_CHANGE_REQUIRED)
            } else {
                user.without_flag(PASSWORD_CHANGE_REQUIRED)
            })
        })?;

        self.changed(username);
        if let Some(realm) = &self.realm {
            realm.reset_attempts(username);
        }
        Ok(())
    }

    pub fn suspend_user(&self, username: &str) -> Result<()> {
        modify(&self.users, username, user_not_found, |user| {
            (!user.is_suspended()).then(|| user.with_flag(IS_SUSPENDED))
        })?;
        self.changed(username);
        Ok(())
    }

    pub fn activate_user(&self, username: &str, require_password_change: bool) -> Result<()> {
        modify(&self.users, username, user_not_found, |user| {
            let user = user.without_flag(IS_SUSPENDED);
            Some(if require_password_change {
                user.with_flag(PASSWORD_CHANGE_REQUIRED)
            } else {
                user
            })
        })?;
        self.changed(username);
        if let Some(realm) = &self.realm {
            realm.reset_attempts(username);
        }
        Ok(())
    }

    pub fn all_usernames(&self) -> Vec<String> {
        self.users.names()
    }

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    pub fn new_role(&self, role: &str, usernames: &[&str]) -> Result<()> {
        let _membership = self.membership_lock();
        for username in usernames {
            self.get_user(username)?;
        }
        self.roles.create(RoleRecord::new(role, usernames.iter().copied()))?;
        for username in usernames {
            self.changed(username);
        }
        info!("Created role '{}'", role);
        Ok(())
    }

    /// Delete a custom role. Predefined roles cannot be deleted.
    pub fn delete_role(&self, role: &str) -> Result<()> {
        if is_predefined(role) {
            return Err(Error::Validation(format!(
                "'{}' is a predefined role and can not be deleted.",
                role
            )));
        }
        let record = self.roles.find_by_name(role).ok_or_else(|| role_not_found(role))?;
        if !self.roles.delete(&record)? {
            return Err(role_not_found(role));
        }
        for username in record.users() {
            self.changed(username);
        }
        info!("Deleted role '{}'", role);
        Ok(())
    }

    pub fn add_role_to_user(&self, role: &str, username: &str) -> Result<()> {
        let _membership = self.membership_lock();
        self.get_user(username)?;
        modify(&self.roles, role, role_not_found, |r| {
            (!r.users().contains(username)).then(|| r.with_user(username))
        })?;
        self.changed(username);
        Ok(())
    }

    /// Removing a role the user does not hold is a no-op
    pub fn remove_role_from_user(&self, role: &str, username: &str) -> Result<()> {
        let _membership = self.membership_lock();
        self.get_user(username)?;
        modify(&self.roles, role, role_not_found, |r| {
            r.users().contains(username).then(|| r.without_user(username))
        })?;
        self.changed(username);
        Ok(())
    }

    pub fn all_role_names(&self) -> Vec<String> {
        self.roles.names()
    }

    pub fn roles_for_user(&self, username: &str) -> Result<BTreeSet<String>> {
        self.get_user(username)?;
        Ok(self.roles.names_containing(username))
    }

    pub fn users_for_role(&self, role: &str) -> Result<BTreeSet<String>> {
        self.roles
            .find_by_name(role)
            .map(|r| r.users().clone())
            .ok_or_else(|| role_not_found(role))
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Add a user to a group, creating the group on first use
    pub fn add_user_to_group(&self, group: &str, username: &str) -> Result<()> {
        let _membership = self.membership_lock();
        self.get_user(username)?;
        loop {
            let Some(current) = self.groups.find_by_name(group) else {
                match self.groups.create(GroupRecord::new(group, [username])) {
                    Err(Error::Store(StoreError::NameAlreadyExists(_))) => continue,
                    other => return other,
                }
            };
            if current.members().contains(username) {
                return Ok(());
            }
            match self.groups.update(&current, current.clone().with_member(username)) {
                Err(Error::Store(StoreError::ConcurrentModification(_))) => continue,
                other => return other,
            }
        }
    }

    /// Removing a user from a group it is not in, or from a missing group, is a no-op
    pub fn remove_user_from_group(&self, group: &str, username: &str) -> Result<()> {
        let _membership = self.membership_lock();
        self.remove_group_member(group, username)
    }

    fn remove_group_member(&self, group: &str, username: &str) -> Result<()> {
        match modify(&self.groups, group, group_not_found, |g| {
            g.members().contains(username).then(|| g.without_member(username))
        }) {
            Err(Error::Store(StoreError::NotFound(_))) => Ok(()),
            other => other,
        }
    }

    pub fn groups_for_user(&self, username: &str) -> BTreeSet<String> {
        self.groups.names_containing(username)
    }
}

fn user_not_found(username: &str) -> Error {
    AuthError::UserNotFound(username.to_string()).into()
}

fn role_not_found(role: &str) -> Error {
    AuthError::RoleNotFound(role.to_string()).into()
}

fn group_not_found(group: &str) -> Error {
    StoreError::NotFound(group.to_string()).into()
}

/// Apply `change` to the current record until the update lands.
/// `change` returning `None` means nothing to do.
fn modify<R: Record>(
    store: &RecordStore<R>,
    name: &str,
    not_found: fn(&str) -> Error,
    change: impl Fn(R) -> Option<R>,
) -> Result<()> {
    loop {
        let current = store.find_by_name(name).ok_or_else(|| not_found(name))?;
        let Some(next) = change(current.clone()) else {
            return Ok(());
        };
        match store.update(&current, next) {
            Err(Error::Store(StoreError::ConcurrentModification(_))) => continue,
            other => return other,
        }
    }
}
