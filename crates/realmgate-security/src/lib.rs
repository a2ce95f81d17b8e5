//! Realmgate Security Core
//!
//! Provides:
//! - Multi-realm login and authorization (local, directory, plugin)
//! - Access mode composition and security contexts
//! - Crash-safe user, role and group stores with hot reload
//! - Authentication cache
//! - Audit reporting

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod access_mode;
pub mod admin;
pub mod audit;
pub mod auth_result;
pub mod cache;
pub mod clock;
pub mod context;
pub mod coordinator;
pub mod credential;
pub mod realm;
pub mod reload;
pub mod roles;
pub mod scheduler;
pub mod store;
pub mod token;

mod manager;

pub use access_mode::{AccessMode, Permission, StaticMode};
pub use admin::UserManager;
pub use audit::{AuditEntry, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use auth_result::AuthenticationResult;
pub use cache::AuthCache;
pub use clock::{Clock, FakeClock, SystemClock};
pub use context::{SecurityContext, Subject};
pub use coordinator::RealmCoordinator;
pub use manager::{Collaborators, SecurityManager};
pub use realm::{Realm, RealmCapabilities};
pub use reload::{HotReloadLoop, ReloadOutcome, ReloadState};
pub use scheduler::{JobHandle, Scheduler, TokioScheduler};
pub use token::AuthToken;
