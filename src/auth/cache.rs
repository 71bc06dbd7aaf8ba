//! Process-local credential mirror.
//!
//! Maps every live credential (access token and API key) to a copy of its
//! user. The store stays authoritative; the mirror answers when the store
//! misses or is down, and is the starting point for serialized updates.

use std::collections::HashMap;

use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use super::users::User;

#[derive(Default)]
pub struct CredentialCache {
    entries: RwLock<HashMap<String, User>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-match lookup by credential
    pub async fn get(&self, credential: &str) -> Option<User> {
        self.entries.read().await.get(credential).cloned()
    }

    /// Scan mirrored records for one whose embedded API key matches
    pub async fn find_by_embedded_key(&self, key: &str) -> Option<User> {
        let guard = self.entries.read().await;
        guard
            .values()
            .find(|u| {
                u.api_key_str()
                    .is_some_and(|k| k.as_bytes().ct_eq(key.as_bytes()).into())
            })
            .cloned()
    }

    pub async fn find_by_username(&self, username: &str) -> Option<User> {
        let guard = self.entries.read().await;
        guard.values().find(|u| u.username == username).cloned()
    }

    /// Unconditionally index `user` under all of its credentials
    pub async fn put(&self, user: &User) {
        let mut guard = self.entries.write().await;
        for credential in user.credentials() {
            guard.insert(credential.to_string(), user.clone());
        }
    }

    /// Index `user` unless the mirror already holds a newer revision of it.
    /// Returns whichever copy is now mirrored.
    pub async fn refresh(&self, user: User) -> User {
        let mut guard = self.entries.write().await;
        let newest = user
            .credentials()
            .filter_map(|c| guard.get(c))
            .filter(|cached| cached.user_id == user.user_id)
            .max_by_key(|cached| cached.revision)
            .filter(|cached| cached.revision > user.revision)
            .cloned()
            .unwrap_or(user);

        for credential in newest.credentials() {
            guard.insert(credential.to_string(), newest.clone());
        }
        newest
    }

    pub async fn evict(&self, credential: &str) {
        self.entries.write().await.remove(credential);
    }

    /// Number of distinct users mirrored
    pub async fn user_count(&self) -> usize {
        let guard = self.entries.read().await;
        let mut ids: Vec<&str> = guard.values().map(|u| u.user_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}
