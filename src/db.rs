use std::path::Path;
use std::sync::Arc;

use tracing::info;
use turso::{Builder, Connection, Database};

use crate::error::GatewayError;

/// Handle to the embedded document store
#[derive(Clone)]
pub struct Db {
    inner: Arc<Database>,
}

impl Db {
    /// Get a database connection
    pub fn conn(&self) -> Result<Connection, GatewayError> {
        self.inner
            .connect()
            .map_err(|e| GatewayError::Database(format!("Failed to get connection: {e}")))
    }
}

/// Table names are spliced into SQL, so only plain identifiers are accepted
pub fn validate_table_name(name: &str) -> Result<(), GatewayError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(GatewayError::Database(format!(
            "Invalid users table name: {name:?}"
        )))
    }
}

/// Open the database and create the users table
pub async fn init_db(path: &Path, users_table: &str) -> Result<Db, GatewayError> {
    validate_table_name(users_table)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            GatewayError::Database(format!("Failed to create DB directory: {e}"))
        })?;
    }

    let path_str = path.to_str().unwrap_or("gateway.db");
    let db = Builder::new_local(path_str)
        .build()
        .await
        .map_err(|e| GatewayError::Database(format!("Failed to open database: {e}")))?;

    let conn = db
        .connect()
        .map_err(|e| GatewayError::Database(format!("Failed to connect: {e}")))?;

    // One JSON document per user; the indexed columns mirror document fields
    conn.execute(
        &format!(
            r#"
            CREATE TABLE IF NOT EXISTS {users_table} (
                user_id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                access_token TEXT NOT NULL UNIQUE,
                api_key TEXT UNIQUE,
                revision INTEGER NOT NULL DEFAULT 0,
                document TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#
        ),
        (),
    )
    .await
    .map_err(|e| GatewayError::Database(format!("Failed to create {users_table} table: {e}")))?;

    info!("Database initialized at {}", path_str);
    Ok(Db {
        inner: Arc::new(db),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("users").is_ok());
        assert!(validate_table_name("_users_v2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2users").is_err());
        assert!(validate_table_name("users; DROP TABLE x").is_err());
    }
}
