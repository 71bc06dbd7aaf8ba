//! User lifecycle and the single write path for user records.
//!
//! Every mutation goes through [`Accounts::modify`], which serializes updates
//! per user, starts from the newest mirrored copy, bumps the revision, and
//! writes the mirror and the store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use super::cache::CredentialCache;
use super::password::{hash_password, verify_password};
use super::resolver::AuthContext;
use super::storage::UserStore;
use super::users::{ApiKey, User};
use crate::error::GatewayError;

/// The mirror holds a mutation the store did not accept
#[derive(Debug, thiserror::Error)]
#[error("update of user {} kept in memory only: {source}", .user.username)]
pub struct PersistError {
    pub user: Box<User>,
    pub source: GatewayError,
}

/// Per-user async mutexes, keyed by `user_id`
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut guard = self.locks.lock().await;
            guard
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Fields accepted at registration, already validated
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

pub struct Accounts {
    store: Arc<dyn UserStore>,
    cache: CredentialCache,
    locks: UserLocks,
    default_quota: Option<u64>,
}

impl Accounts {
    pub fn new(store: Arc<dyn UserStore>, default_quota: Option<u64>) -> Self {
        Self {
            store,
            cache: CredentialCache::new(),
            locks: UserLocks::default(),
            default_quota,
        }
    }

    pub fn store(&self) -> &dyn UserStore {
        self.store.as_ref()
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    /// Apply `f` to the newest copy of `seed`'s record under its user lock.
    ///
    /// The mirror is updated first; a store failure is returned as
    /// `PersistError` holding the updated record.
    pub async fn modify<F>(&self, seed: &User, f: F) -> Result<User, PersistError>
    where
        F: FnOnce(&mut User),
    {
        let _guard = self.locks.lock(&seed.user_id).await;

        let mut user = match self.cache.get(&seed.access_token).await {
            Some(cached) if cached.user_id == seed.user_id && cached.revision >= seed.revision => {
                cached
            }
            _ => seed.clone(),
        };
        let previous_key = user.api_key_str().map(str::to_string);

        f(&mut user);
        user.revision += 1;

        if let Some(old) = previous_key
            && user.api_key_str() != Some(old.as_str())
        {
            self.cache.evict(&old).await;
        }
        self.cache.put(&user).await;

        match self.store.upsert(&user).await {
            Ok(()) => Ok(user),
            Err(source) => Err(PersistError {
                user: Box::new(user),
                source,
            }),
        }
    }

    pub async fn register(&self, new: NewUser) -> Result<User, GatewayError> {
        match self.store.find_by_username(&new.username).await {
            Ok(Some(_)) => return Err(GatewayError::DuplicateUser),
            Ok(None) => {}
            Err(e) => warn!("Store lookup for '{}' failed: {e}", new.username),
        }
        if self.cache.find_by_username(&new.username).await.is_some() {
            return Err(GatewayError::DuplicateUser);
        }

        let password_hash = hash_password(&new.password)?;
        let user = User::new(
            new.username,
            new.email,
            new.full_name,
            password_hash,
            self.default_quota,
        );

        // A token that never reached the store would vanish on restart
        self.store.insert(&user).await?;
        self.cache.put(&user).await;

        info!("User '{}' registered", user.username);
        Ok(user)
    }

    /// Check credentials and record the login
    pub async fn login(&self, username: &str, password: &str) -> Result<User, GatewayError> {
        let stored = match self.store.find_by_username(username).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Store lookup for '{username}' failed: {e}");
                None
            }
        };
        let candidate = match stored {
            Some(user) => Some(self.cache.refresh(user).await),
            None => self.cache.find_by_username(username).await,
        };

        let Some(user) = candidate.filter(|u| verify_password(password, &u.password_hash)) else {
            warn!("Login failed for '{username}'");
            return Err(GatewayError::InvalidLogin);
        };

        if !user.active {
            return Err(GatewayError::AccountInactive);
        }

        let now = Utc::now();
        let user = match self
            .modify(&user, |u| {
                u.last_login = Some(now);
                u.login_count += 1;
            })
            .await
        {
            Ok(user) => user,
            Err(e) => {
                warn!("{e}");
                *e.user
            }
        };

        info!("User '{}' logged in", user.username);
        Ok(user)
    }

    /// Replace the user's API key. The previous key stops resolving.
    pub async fn issue_api_key(&self, seed: &User, name: String) -> Result<ApiKey, PersistError> {
        let api_key = ApiKey::generate(name);
        let issued = api_key.clone();
        let user = self
            .modify(seed, move |u| {
                u.api_key = Some(api_key);
            })
            .await?;
        info!("API key for user '{}' replaced", user.username);
        Ok(issued)
    }

    /// Flip the key-level `active` flag. `Ok(None)` when the caller has no key.
    pub async fn set_api_key_active(
        &self,
        ctx: &AuthContext,
        active: bool,
    ) -> Result<Option<User>, PersistError> {
        if ctx.user.api_key.is_none() {
            return Ok(None);
        }
        let user = self
            .modify(&ctx.user, |u| {
                ctx.stamp_key(u);
                if let Some(key) = u.api_key.as_mut() {
                    key.active = active;
                }
            })
            .await?;
        info!(
            "API key for user '{}' {}",
            user.username,
            if active { "activated" } else { "deactivated" }
        );
        Ok(Some(user))
    }
}
