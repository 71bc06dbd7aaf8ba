//! Bearer credential resolution.
//!
//! Lookup order: store by API key, store by access token, mirror by exact
//! credential, mirror scan of embedded API keys. Rejections are checked in a
//! fixed order: key inactive, account inactive, quota depleted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::accounts::Accounts;
use super::users::{User, mask_credential};
use crate::error::GatewayError;

/// Which credential slot the bearer matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    ApiKey,
    AccessToken,
}

/// An admitted caller
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub credential: String,
    pub kind: CredentialKind,
    pub user: User,
    /// `last_used` stamp for the matched API key, written with the next mutation
    pub key_used_at: Option<DateTime<Utc>>,
}

impl AuthContext {
    /// Carry the pending `last_used` stamp into a record being mutated
    pub fn stamp_key(&self, user: &mut User) {
        if let Some(used_at) = self.key_used_at
            && let Some(key) = user.api_key.as_mut()
            && key.key == self.credential
        {
            key.last_used = Some(used_at);
        }
    }

    pub fn masked_credential(&self) -> String {
        mask_credential(&self.credential)
    }
}

fn holds_credential(user: &User, credential: &str) -> bool {
    user.credentials()
        .any(|c| c.as_bytes().ct_eq(credential.as_bytes()).into())
}

pub struct Authenticator {
    accounts: Arc<Accounts>,
}

impl Authenticator {
    pub fn new(accounts: Arc<Accounts>) -> Self {
        Self { accounts }
    }

    async fn lookup_durable(&self, credential: &str) -> Option<User> {
        let store = self.accounts.store();
        match store.find_by_api_key(credential).await {
            Ok(Some(user)) => return Some(user),
            Ok(None) => {}
            Err(e) => {
                warn!("Store lookup by API key failed: {e}");
                return None;
            }
        }
        match store.find_by_access_token(credential).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Store lookup by access token failed: {e}");
                None
            }
        }
    }

    async fn lookup(&self, credential: &str) -> Option<User> {
        let cache = self.accounts.cache();
        if let Some(user) = self.lookup_durable(credential).await {
            // A stale store row may still index a key the mirror has rotated away
            let user = cache.refresh(user).await;
            return holds_credential(&user, credential).then_some(user);
        }
        if let Some(user) = cache.get(credential).await {
            return Some(user);
        }
        cache.find_by_embedded_key(credential).await
    }

    /// Resolve a bearer credential to an admitted caller
    pub async fn resolve(&self, credential: Option<&str>) -> Result<AuthContext, GatewayError> {
        let Some(credential) = credential.map(str::trim).filter(|c| !c.is_empty()) else {
            return Err(GatewayError::MissingCredential);
        };
        let masked = mask_credential(credential);

        let Some(user) = self.lookup(credential).await else {
            warn!("Auth failed: Invalid key {masked}");
            return Err(GatewayError::InvalidCredential);
        };

        let matched_key = user
            .api_key
            .as_ref()
            .filter(|k| k.key.as_bytes().ct_eq(credential.as_bytes()).into());

        if matched_key.is_some_and(|k| !k.active) {
            warn!(
                "Auth failed: Inactive API key {masked} for user '{}'",
                user.username
            );
            return Err(GatewayError::KeyInactive);
        }

        if !user.active {
            warn!(
                "Auth failed: Inactive account for user '{}' (key {masked})",
                user.username
            );
            return Err(GatewayError::AccountInactive);
        }

        if user.quota_left.is_some_and(|q| q == 0) {
            warn!(
                "Quota exceeded for user '{}' (key {masked})",
                user.username
            );
            return Err(GatewayError::QuotaExceeded);
        }

        let (kind, key_used_at) = if matched_key.is_some() {
            (CredentialKind::ApiKey, Some(Utc::now()))
        } else {
            (CredentialKind::AccessToken, None)
        };

        info!("Auth success: User '{}' (key {masked})", user.username);
        Ok(AuthContext {
            credential: credential.to_string(),
            kind,
            user,
            key_used_at,
        })
    }
}
