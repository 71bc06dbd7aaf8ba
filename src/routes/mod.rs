pub mod admin;
pub mod auth;
pub mod health;
pub mod openai;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderMap, header},
};

use crate::AppState;
use crate::auth::AuthContext;
use crate::error::GatewayError;

const MAX_USERNAME_LENGTH: usize = 50;
const MIN_USERNAME_LENGTH: usize = 3;
const MIN_PASSWORD_LENGTH: usize = 6;
const MAX_KEY_NAME_LENGTH: usize = 50;

/// Extract the credential from `Authorization: Bearer <token>`
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token)
}

/// Resolve the caller of a bearer-protected route
pub async fn authenticate(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<AuthContext, GatewayError> {
    state
        .authenticator
        .resolve(extract_bearer_token(headers))
        .await
}

/// Unwrap a JSON body, reporting malformed input as a validation error
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| GatewayError::validation(rejection.body_text()))
}

fn validate_username(username: &str) -> Result<(), GatewayError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(GatewayError::invalid_param(
            "username",
            format!(
                "Username must be between {MIN_USERNAME_LENGTH} and {MAX_USERNAME_LENGTH} characters"
            ),
        ));
    }
    if !username.chars().all(char::is_alphanumeric) {
        return Err(GatewayError::invalid_param(
            "username",
            "Username must be alphanumeric",
        ));
    }
    Ok(())
}

/// Syntactic check: one `@`, non-empty local part, dotted domain
fn validate_email(email: &str) -> Result<(), GatewayError> {
    let invalid = || GatewayError::invalid_param("email", "Invalid email address");
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || email.chars().any(char::is_whitespace)
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || domain.contains("..")
    {
        return Err(invalid());
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), GatewayError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(GatewayError::invalid_param(
            "password",
            format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
        ));
    }
    Ok(())
}

fn validate_key_name(name: &str) -> Result<(), GatewayError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GatewayError::invalid_param(
            "name",
            "Key name cannot be empty",
        ));
    }
    if name.chars().count() > MAX_KEY_NAME_LENGTH {
        return Err(GatewayError::invalid_param(
            "name",
            format!("Key name too long (max {MAX_KEY_NAME_LENGTH} characters)"),
        ));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(GatewayError::invalid_param(
            "name",
            "Key name cannot contain control characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("al").is_err());
        assert!(validate_username(&"a".repeat(51)).is_err());
        assert!(validate_username("alice_1").is_err());
        assert!(validate_username("alice 1").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("alice@x.com").is_ok());
        assert!(validate_email("alice").is_err());
        assert!(validate_email("@x.com").is_err());
        assert!(validate_email("alice@x").is_err());
        assert!(validate_email("alice@@x.com").is_err());
        assert!(validate_email("al ice@x.com").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("secret").is_ok());
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn test_validate_key_name() {
        assert!(validate_key_name("ci").is_ok());
        assert!(validate_key_name("   ").is_err());
        assert!(validate_key_name(&"k".repeat(51)).is_err());
        assert!(validate_key_name("bad\nname").is_err());
    }
}
