// utils/token.rs
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ErrorMessage, HttpError},
    models::usermodel::{AuthUser, UserRole},
};

/// Claims issued by the platform's auth service.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(default = "default_role")]
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: usize,
    pub exp: usize,
}

fn default_role() -> UserRole {
    UserRole::User
}

pub fn decode_token<T: Into<String>>(token: T, secret: &[u8]) -> Result<AuthUser, HttpError> {
    let decoded = decode::<TokenClaims>(
        &token.into(),
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| HttpError::unauthorized(ErrorMessage::InvalidToken.to_string()))?;

    let id = Uuid::parse_str(&decoded.claims.sub)
        .map_err(|_| HttpError::unauthorized(ErrorMessage::InvalidToken.to_string()))?;

    Ok(AuthUser {
        id,
        role: decoded.claims.role,
        email: decoded.claims.email,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(sub: &str, role: UserRole, ttl: Duration, secret: &[u8]) -> String {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: sub.to_string(),
            role,
            email: None,
            iat: now.timestamp() as usize,
            exp: (now + ttl).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn decodes_subject_and_role() {
        let id = Uuid::new_v4();
        let token = token_for(&id.to_string(), UserRole::Admin, Duration::minutes(30), b"secret");
        let user = decode_token(token, b"secret").unwrap();
        assert_eq!(user.id, id);
        assert!(user.is_admin());
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let id = Uuid::new_v4().to_string();
        let token = token_for(&id, UserRole::User, Duration::minutes(30), b"secret");
        assert!(decode_token(token, b"other").is_err());

        let expired = token_for(&id, UserRole::User, Duration::minutes(-30), b"secret");
        assert!(decode_token(expired, b"secret").is_err());
    }

    #[test]
    fn rejects_non_uuid_subjects() {
        let token = token_for("not-a-uuid", UserRole::User, Duration::minutes(30), b"secret");
        assert!(decode_token(token, b"secret").is_err());
    }
}
