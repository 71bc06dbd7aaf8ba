use async_trait::async_trait;
use turso::Connection;

use super::users::User;
use crate::db::Db;
use crate::error::GatewayError;

/// Durable home of user documents
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, GatewayError>;

    async fn find_by_api_key(&self, key: &str) -> Result<Option<User>, GatewayError>;

    async fn find_by_access_token(&self, token: &str) -> Result<Option<User>, GatewayError>;

    /// Insert a brand-new user. Username, token or key collisions yield `DuplicateUser`.
    async fn insert(&self, user: &User) -> Result<(), GatewayError>;

    /// Write the full document, keyed by `user_id`, creating it when missing
    async fn upsert(&self, user: &User) -> Result<(), GatewayError>;

    async fn count(&self) -> Result<u64, GatewayError>;
}

pub struct TursoUserStore {
    db: Db,
    table: String,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl TursoUserStore {
    pub fn new(db: Db, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
        }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<User>, GatewayError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT document FROM {} WHERE {column} = ?", self.table),
                [value],
            )
            .await
            .map_err(|e| GatewayError::Database(format!("Failed to look up user: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| GatewayError::Database(format!("Failed to read user row: {e}")))?
        else {
            return Ok(None);
        };

        let document = row
            .get::<String>(0)
            .map_err(|e| GatewayError::Database(format!("Failed to read user document: {e}")))?;
        serde_json::from_str(&document)
            .map(Some)
            .map_err(|e| GatewayError::Database(format!("Corrupt user document: {e}")))
    }

    async fn write(
        &self,
        conn: &Connection,
        sql: &str,
        user: &User,
        context: &str,
    ) -> Result<u64, GatewayError> {
        let document = serde_json::to_string(user)
            .map_err(|e| GatewayError::Internal(format!("Failed to encode user: {e}")))?;
        conn.execute(
            sql,
            (
                user.username.as_str(),
                user.access_token.as_str(),
                user.api_key_str(),
                user.revision as i64,
                document.as_str(),
                now_millis(),
                user.user_id.as_str(),
            ),
        )
        .await
        .map_err(|e| GatewayError::Database(format!("{context}: {e}")))
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (username, access_token, api_key, revision, document, updated_at, user_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.table
        )
    }
}

#[async_trait]
impl UserStore for TursoUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, GatewayError> {
        self.find_one("username", username).await
    }

    async fn find_by_api_key(&self, key: &str) -> Result<Option<User>, GatewayError> {
        self.find_one("api_key", key).await
    }

    async fn find_by_access_token(&self, token: &str) -> Result<Option<User>, GatewayError> {
        self.find_one("access_token", token).await
    }

    async fn insert(&self, user: &User) -> Result<(), GatewayError> {
        let conn = self.db.conn()?;
        match self
            .write(&conn, &self.insert_sql(), user, "Failed to insert user")
            .await
        {
            Ok(_) => Ok(()),
            Err(GatewayError::Database(msg)) if msg.to_ascii_uppercase().contains("UNIQUE") => {
                Err(GatewayError::DuplicateUser)
            }
            Err(e) => Err(e),
        }
    }

    async fn upsert(&self, user: &User) -> Result<(), GatewayError> {
        let conn = self.db.conn()?;
        let update_sql = format!(
            "UPDATE {} SET username = ?, access_token = ?, api_key = ?, revision = ?, document = ?, updated_at = ? \
             WHERE user_id = ?",
            self.table
        );
        let affected = self
            .write(&conn, &update_sql, user, "Failed to update user")
            .await?;

        if affected == 0 {
            self.write(&conn, &self.insert_sql(), user, "Failed to insert user")
                .await?;
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64, GatewayError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT COUNT(*) FROM {}", self.table), ())
            .await
            .map_err(|e| GatewayError::Database(format!("Failed to count users: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| GatewayError::Database(format!("Failed to read user count: {e}")))?
            .ok_or_else(|| GatewayError::Database("User count returned no rows".into()))?;
        let count = row
            .get::<i64>(0)
            .map_err(|e| GatewayError::Database(format!("Failed to read user count: {e}")))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
pub use memory::MemoryUserStore;

#[cfg(test)]
mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::RwLock;

    use super::*;

    /// In-process store with a switch that simulates an outage
    #[derive(Default)]
    pub struct MemoryUserStore {
        users: RwLock<HashMap<String, User>>,
        offline: AtomicBool,
    }

    impl MemoryUserStore {
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub async fn get(&self, user_id: &str) -> Option<User> {
            self.users.read().await.get(user_id).cloned()
        }

        fn check(&self) -> Result<(), GatewayError> {
            if self.offline.load(Ordering::SeqCst) {
                Err(GatewayError::Database("store offline".into()))
            } else {
                Ok(())
            }
        }

        async fn find(&self, pred: impl Fn(&User) -> bool) -> Result<Option<User>, GatewayError> {
            self.check()?;
            Ok(self.users.read().await.values().find(|u| pred(u)).cloned())
        }
    }

    #[async_trait]
    impl UserStore for MemoryUserStore {
        async fn find_by_username(&self, username: &str) -> Result<Option<User>, GatewayError> {
            self.find(|u| u.username == username).await
        }

        async fn find_by_api_key(&self, key: &str) -> Result<Option<User>, GatewayError> {
            self.find(|u| u.api_key_str() == Some(key)).await
        }

        async fn find_by_access_token(&self, token: &str) -> Result<Option<User>, GatewayError> {
            self.find(|u| u.access_token == token).await
        }

        async fn insert(&self, user: &User) -> Result<(), GatewayError> {
            self.check()?;
            let mut guard = self.users.write().await;
            if guard
                .values()
                .any(|u| u.username == user.username || u.user_id == user.user_id)
            {
                return Err(GatewayError::DuplicateUser);
            }
            guard.insert(user.user_id.clone(), user.clone());
            Ok(())
        }

        async fn upsert(&self, user: &User) -> Result<(), GatewayError> {
            self.check()?;
            self.users
                .write()
                .await
                .insert(user.user_id.clone(), user.clone());
            Ok(())
        }

        async fn count(&self) -> Result<u64, GatewayError> {
            self.check()?;
            Ok(self.users.read().await.len() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::users::ApiKey;
    use crate::db::init_db;

    async fn temp_store() -> (tempfile::TempDir, TursoUserStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = init_db(&dir.path().join("gateway.db"), "users")
            .await
            .unwrap();
        (dir, TursoUserStore::new(db, "users"))
    }

    fn user(name: &str) -> User {
        User::new(
            name.into(),
            format!("{name}@x.com"),
            None,
            "hash".into(),
            Some(500_000),
        )
    }

    #[tokio::test]
    async fn test_insert_and_lookup_by_each_index() {
        let (_dir, store) = temp_store().await;
        let mut alice = user("alice");
        alice.api_key = Some(ApiKey::generate("ci".into()));
        store.insert(&alice).await.unwrap();

        let by_name = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name, alice);
        let by_token = store
            .find_by_access_token(&alice.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_token.user_id, alice.user_id);
        let by_key = store
            .find_by_api_key(alice.api_key_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.user_id, alice.user_id);

        assert!(store.find_by_username("bob").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let (_dir, store) = temp_store().await;
        store.insert(&user("alice")).await.unwrap();
        let err = store.insert(&user("alice")).await.unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateUser));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rotates_key_index() {
        let (_dir, store) = temp_store().await;
        let mut alice = user("alice");
        alice.api_key = Some(ApiKey::generate("first".into()));
        store.insert(&alice).await.unwrap();
        let old_key = alice.api_key_str().unwrap().to_string();

        alice.api_key = Some(ApiKey::generate("second".into()));
        alice.request_count = 3;
        alice.revision += 1;
        store.upsert(&alice).await.unwrap();

        assert!(store.find_by_api_key(&old_key).await.unwrap().is_none());
        let found = store
            .find_by_api_key(alice.api_key_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.request_count, 3);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_creates_missing_user() {
        let (_dir, store) = temp_store().await;
        let bob = user("bob");
        store.upsert(&bob).await.unwrap();
        assert!(store.find_by_username("bob").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_count_reports_empty_table_and_read_failures() {
        let (dir, store) = temp_store().await;
        assert_eq!(store.count().await.unwrap(), 0);

        let db = init_db(&dir.path().join("other.db"), "users")
            .await
            .unwrap();
        let missing = TursoUserStore::new(db, "accounts");
        assert!(matches!(
            missing.count().await,
            Err(GatewayError::Database(_))
        ));
    }
}
