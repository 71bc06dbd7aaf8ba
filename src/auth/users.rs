//! The persisted user document.
//!
//! One `User` is stored per account. The struct has a fixed set of required
//! fields plus an `extra` map so documents written by newer (or older) builds
//! keep their unknown fields across a read/write cycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::constants::{ACCESS_TOKEN_PREFIX, API_KEY_PREFIX};

pub const USER_SCHEMA_VERSION: u32 = 1;

/// Length of the random part of generated credentials
const CREDENTIAL_RANDOM_LEN: usize = 24;

fn current_schema_version() -> u32 {
    USER_SCHEMA_VERSION
}

fn default_true() -> bool {
    true
}

/// The single API key slot of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Usage counters for one external model id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelUsage {
    pub request_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    /// Bumped by every mutation; the credential mirror keeps the highest one
    #[serde(default)]
    pub revision: u64,

    pub user_id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub password_hash: String,

    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKey>,

    #[serde(default = "default_true")]
    pub active: bool,
    /// Remaining tokens; `None` means unlimited
    #[serde(default)]
    pub quota_left: Option<u64>,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_cost: Decimal,
    #[serde(default)]
    pub model_usage: BTreeMap<String, ModelUsage>,

    pub account_created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub login_count: u64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(
        username: String,
        email: String,
        full_name: Option<String>,
        password_hash: String,
        quota_left: Option<u64>,
    ) -> Self {
        Self {
            schema_version: USER_SCHEMA_VERSION,
            revision: 0,
            user_id: Uuid::new_v4().to_string(),
            username,
            email,
            full_name,
            password_hash,
            access_token: generate_credential(ACCESS_TOKEN_PREFIX),
            api_key: None,
            active: true,
            quota_left,
            request_count: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: Decimal::ZERO,
            model_usage: BTreeMap::new(),
            account_created_at: Utc::now(),
            last_login: None,
            login_count: 0,
            extra: Map::new(),
        }
    }

    /// The live API key string, if any
    pub fn api_key_str(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.key.as_str())
    }

    /// Every credential that resolves to this user
    pub fn credentials(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.access_token.as_str()).chain(self.api_key_str())
    }
}

impl ApiKey {
    pub fn generate(name: String) -> Self {
        Self {
            key: generate_credential(API_KEY_PREFIX),
            name,
            created_at: Utc::now(),
            last_used: None,
            active: true,
        }
    }
}

/// `<prefix>_<24 random alphanumerics>`
pub fn generate_credential(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CREDENTIAL_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{prefix}_{suffix}")
}

/// Log-safe rendering of a credential: `...abcd`
pub fn mask_credential(credential: &str) -> String {
    let tail: String = credential
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generate_credential_format() {
        let token = generate_credential(ACCESS_TOKEN_PREFIX);
        let suffix = token.strip_prefix("access_token_").unwrap();
        assert_eq!(suffix.len(), 24);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_credential(ACCESS_TOKEN_PREFIX));
    }

    #[test]
    fn test_mask_credential() {
        assert_eq!(mask_credential("user_key_abcdef"), "...cdef");
        assert_eq!(mask_credential("ab"), "...ab");
    }

    #[test]
    fn test_new_user_defaults() {
        let user = User::new(
            "alice".into(),
            "alice@x.com".into(),
            None,
            "hash".into(),
            Some(500_000),
        );
        assert!(user.active);
        assert!(user.api_key.is_none());
        assert_eq!(user.quota_left, Some(500_000));
        assert_eq!(user.total_cost, Decimal::ZERO);
        assert!(user.access_token.starts_with("access_token_"));
        assert_eq!(user.credentials().count(), 1);
    }

    #[test]
    fn test_cost_serializes_as_decimal_string() {
        let mut user = User::new("bob".into(), "b@x.com".into(), None, "h".into(), None);
        user.total_cost = Decimal::new(15, 8);
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["total_cost"], "0.00000015");
        assert!(value["quota_left"].is_null());
    }

    #[test]
    fn test_legacy_document_keeps_unknown_fields() {
        let doc = json!({
            "user_id": "u-1",
            "username": "carol",
            "email": "c@x.com",
            "password_hash": "h",
            "access_token": "access_token_abc",
            "account_created_at": "2025-01-01T00:00:00Z",
            "total_cost": "1.25",
            "model_usage": {
                "gpt-4o": {"request_count": 2, "input_tokens": 10, "output_tokens": 5, "cost": "0.5"}
            },
            "referral_code": "XYZ"
        });
        let user: User = serde_json::from_value(doc).unwrap();
        assert_eq!(user.schema_version, USER_SCHEMA_VERSION);
        assert!(user.active);
        assert_eq!(user.quota_left, None);
        assert_eq!(user.total_cost, Decimal::new(125, 2));
        assert_eq!(user.model_usage["gpt-4o"].request_count, 2);
        assert_eq!(user.extra["referral_code"], "XYZ");

        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back["referral_code"], "XYZ");
    }
}
