//! Hot reload of the local user and role files
//!
//! A recurring job polls the file versions of both stores. When either file
//! changed since it was last loaded or written, both files are re-read in
//! strict mode, role members are checked against the fresh user set and only
//! then are the new record sets installed. A rejected attempt leaves the
//! published records untouched and is retried on the next tick; the loop gives
//! up with [`ReloadError::ReloadExhausted`] after a configured number of
//! consecutive failures.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use realmgate_common::config::ReloadConfig;
use realmgate_common::error::{ReloadError, ReloadFailure, Result, StoreError};
use realmgate_common::metrics;

use crate::scheduler::{JobHandle, Scheduler};
use crate::store::{LoadedRecords, Record, RecordStore, RoleStore, StoreLock, UserStore};

/// Where the loop stands between ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    Idle,
    Reloading,
    /// Consecutive rejected attempts
    Failed(u32),
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Unchanged,
    Reloaded,
    Rejected { attempt: u32 },
}

type Listener = Box<dyn Fn() + Send + Sync>;

pub struct HotReloadLoop {
    users: Arc<UserStore>,
    roles: Arc<RoleStore>,
    max_attempts: u32,
    state: Mutex<ReloadState>,
    listeners: Mutex<Vec<Listener>>,
}

impl HotReloadLoop {
    pub fn new(users: Arc<UserStore>, roles: Arc<RoleStore>, max_attempts: u32) -> Self {
        Self {
            users,
            roles,
            max_attempts: max_attempts.max(1),
            state: Mutex::new(ReloadState::Idle),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ReloadState {
        *self.state.lock()
    }

    /// Register a callback run after every successful reload
    pub fn on_reload(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Run one poll. Returns an error only once the retry budget is spent.
    pub fn tick(&self) -> std::result::Result<ReloadOutcome, ReloadError> {
        let mut state = self.state.lock();

        let retrying = matches!(*state, ReloadState::Failed(_));
        if !retrying && !self.files_changed() {
            return Ok(ReloadOutcome::Unchanged);
        }

        let failures = match *state {
            ReloadState::Failed(n) => n,
            _ => 0,
        };
        *state = ReloadState::Reloading;
        debug!("Reloading {:?} and {:?}", self.users.path(), self.roles.path());

        match self.reload() {
            Ok((users, roles)) => {
                info!("Reloaded {} users and {} roles from disk", users, roles);
                metrics::record_reload("success");
                *state = ReloadState::Idle;
                drop(state);
                for listener in self.listeners.lock().iter() {
                    listener();
                }
                Ok(ReloadOutcome::Reloaded)
            }
            Err(cause) => {
                let attempt = failures + 1;
                *state = ReloadState::Failed(attempt);
                metrics::record_reload("failure");

                if attempt >= self.max_attempts {
                    error!("Giving up on auth file reload after {} attempts: {}", attempt, cause);
                    return Err(ReloadError::ReloadExhausted { attempts: attempt, cause });
                }

                warn!(
                    "Auth file reload attempt {}/{} rejected: {}",
                    attempt, self.max_attempts, cause
                );
                Ok(ReloadOutcome::Rejected { attempt })
            }
        }
    }

    fn files_changed(&self) -> bool {
        changed(&self.users) || changed(&self.roles)
    }

    /// Both stores stay locked from the read until the install, so a local
    /// write either lands in the files read here or commits after the install.
    fn reload(&self) -> std::result::Result<(usize, usize), ReloadFailure> {
        let users_lock = self.users.lock();
        let roles_lock = self.roles.lock();
        let users = read_strict(&users_lock)?;
        let roles = read_strict(&roles_lock)?;

        for role in roles.records.values() {
            if let Some(user) = role.users().iter().find(|u| !users.records.contains_key(*u)) {
                return Err(ReloadFailure::DanglingRoleMember {
                    role: role.name().to_string(),
                    user: user.clone(),
                });
            }
        }

        let counts = (users.records.len(), roles.records.len());
        users_lock.install(users);
        roles_lock.install(roles);
        Ok(counts)
    }

    /// Schedule the loop. `on_fatal` runs once if the retry budget is spent,
    /// after which the job stops.
    pub fn start(
        self: &Arc<Self>,
        scheduler: &dyn Scheduler,
        config: &ReloadConfig,
        on_fatal: impl Fn(ReloadError) + Send + Sync + 'static,
    ) -> Result<JobHandle> {
        let reload = Arc::clone(self);
        scheduler.schedule_recurring(
            "auth-file-reload",
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.period_ms),
            Box::new(move || match reload.tick() {
                Ok(_) => ControlFlow::Continue(()),
                Err(e) => {
                    on_fatal(e);
                    ControlFlow::Break(())
                }
            }),
        )
    }
}

fn changed<R: Record>(store: &RecordStore<R>) -> bool {
    match store.disk_version() {
        Ok(version) => version != store.loaded_version(),
        // let the reload report it
        Err(_) => true,
    }
}

fn read_strict<R: Record>(store: &StoreLock<'_, R>) -> std::result::Result<LoadedRecords<R>, ReloadFailure> {
    let loaded = store.read_file().map_err(|e| ReloadFailure::Unreadable {
        path: store.path().to_path_buf(),
        reason: e.to_string(),
    })?;

    match loaded.invalid.first() {
        Some(StoreError::CorruptRecordLine { path, line, reason }) => Err(ReloadFailure::CorruptFile {
            path: path.clone(),
            line: *line,
            reason: reason.clone(),
        }),
        Some(other) => Err(ReloadFailure::Unreadable {
            path: store.path().to_path_buf(),
            reason: other.to_string(),
        }),
        None => Ok(loaded),
    }
}
