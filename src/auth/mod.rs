//! Users, credentials and usage accounting.
//!
//! - `users`: the persisted user document
//! - `storage`: durable store trait and its turso implementation
//! - `cache`: in-process credential mirror
//! - `accounts`: registration, login and the serialized write path
//! - `resolver`: bearer credential resolution and admission checks
//! - `models`: model remapping and pricing
//! - `usage`: per-call accounting

pub mod accounts;
pub mod cache;
pub mod models;
pub mod password;
pub mod resolver;
pub mod storage;
pub mod usage;
pub mod users;

pub use accounts::{Accounts, NewUser};
pub use models::{ModelCatalog, ModelRoute};
pub use resolver::{AuthContext, Authenticator};
pub use storage::{TursoUserStore, UserStore};
pub use usage::{TokenDelta, UsageAccountant};
pub use users::{ApiKey, User};
