use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::error::ApiError;
use crate::state::AppState;

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Original clients send the token bare in the Authorization header;
/// newer ones use the Bearer scheme. Accept both.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let h = headers.get(AUTHORIZATION)?;
    let s = h.to_str().ok()?;
    let s = s.strip_prefix("Bearer ").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    Some(s.to_string())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

pub fn make_access_token(cfg: &JwtConfig, user_id: i64) -> Result<String> {
    let exp = now_epoch_secs() + cfg.access_token_expire_minutes * 60;
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
        jti: Uuid::new_v4().to_string(),
    };
    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(cfg.secret_key.as_bytes()),
    )?)
}

pub fn decode_user_id(secret: &str, token: &str) -> Result<i64, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => {
            ApiError::new(StatusCode::UNAUTHORIZED, "EXPIRED_SIGNATURE")
        }
        _ => ApiError::new(StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
    })?;
    let user_id = decoded.claims.sub.parse::<i64>().unwrap_or(0);
    if user_id <= 0 {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "INVALID_TOKEN"));
    }
    Ok(user_id)
}

/// Resolves the caller from the Authorization header. The user row must
/// still exist; a valid token for a deleted account is rejected.
pub async fn auth_user(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "ACCESS_TOKEN_REQUIRED"))?;
    let user_id = decode_user_id(&state.cfg.jwt.secret_key, &token)?;
    let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}"))
        })?;
    if exists.is_none() {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "INVALID_USER"));
    }
    Ok(AuthUser { user_id })
}

pub fn valid_email(s: &str) -> bool {
    let Some((local, domain)) = s.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.chars().any(char::is_whitespace)
}

/// 8-16 chars, at least one letter, one digit and one special character.
pub fn valid_password(s: &str) -> bool {
    const SPECIALS: &str = "@$!%*#?&";
    (8..=16).contains(&s.chars().count())
        && s.chars().any(|c| c.is_ascii_alphabetic())
        && s.chars().any(|c| c.is_ascii_digit())
        && s.chars().any(|c| SPECIALS.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg(expire_minutes: i64) -> JwtConfig {
        JwtConfig {
            secret_key: "test-secret".to_string(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: expire_minutes,
        }
    }

    #[test]
    fn token_roundtrip() {
        let cfg = test_cfg(60);
        let token = make_access_token(&cfg, 42).unwrap();
        assert_eq!(decode_user_id(&cfg.secret_key, &token).unwrap(), 42);
    }

    #[test]
    fn wrong_secret_rejected() {
        let cfg = test_cfg(60);
        let token = make_access_token(&cfg, 42).unwrap();
        let err = decode_user_id("other-secret", &token).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "INVALID_TOKEN");
    }

    #[test]
    fn expired_token_rejected() {
        let cfg = test_cfg(-10);
        let token = make_access_token(&cfg, 42).unwrap();
        let err = decode_user_id(&cfg.secret_key, &token).unwrap_err();
        assert_eq!(err.message, "EXPIRED_SIGNATURE");
    }

    #[test]
    fn garbage_token_rejected() {
        let err = decode_user_id("test-secret", "not.a.jwt").unwrap_err();
        assert_eq!(err.message, "INVALID_TOKEN");
    }

    #[test]
    fn email_shapes() {
        assert!(valid_email("user@example.com"));
        assert!(valid_email("a.b+c@mail.example.co"));
        assert!(!valid_email("userexample.com"));
        assert!(!valid_email("@example.com"));
        assert!(!valid_email("user@nodot"));
        assert!(!valid_email("user@.com"));
        assert!(!valid_email("user name@example.com"));
    }

    #[test]
    fn password_shapes() {
        assert!(valid_password("abcd123!"));
        assert!(valid_password("Pa55word#16char!"));
        assert!(!valid_password("short1!"));
        assert!(!valid_password("nodigits!!"));
        assert!(!valid_password("nospecials99"));
        assert!(!valid_password("12345678!"));
        assert!(!valid_password("waytoolongpassword1!"));
    }
}
