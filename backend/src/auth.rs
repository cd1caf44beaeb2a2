use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{Role, User};

/// Identity threaded explicitly into every workflow instead of being
/// re-derived from ambient session state per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String, // Email
    uid: i64,    // Resolved numeric user id
    role: Role,
    exp: usize, // Expiration time
}

pub fn create_token(user: &User, jwt_secret: &str) -> AppResult<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .ok_or_else(|| AppError::Config("token expiry overflow".into()))?
        .timestamp() as usize;
    let claims = Claims {
        sub: user.email.clone(),
        uid: user.id,
        role: user.role,
        exp: expiration,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Config(format!("sign token: {e}")))
}

pub fn validate_token(token: &str, jwt_secret: &str) -> AppResult<SessionContext> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized)?;
    Ok(SessionContext {
        user_id: token_data.claims.uid,
        email: token_data.claims.sub,
        role: token_data.claims.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buyer() -> User {
        User {
            id: 42,
            email: "buyer@example.com".into(),
            firstname: "Ada".into(),
            lastname: "Nguyen".into(),
            idverified: true,
            photoverified: true,
            profile_complete: true,
            role: Role::Buyer,
        }
    }

    #[test]
    fn token_round_trips_identity() {
        let token = create_token(&buyer(), "test-secret").unwrap();
        let ctx = validate_token(&token, "test-secret").unwrap();
        assert_eq!(ctx.user_id, 42);
        assert_eq!(ctx.email, "buyer@example.com");
        assert_eq!(ctx.role, Role::Buyer);
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let token = create_token(&buyer(), "test-secret").unwrap();
        assert!(matches!(
            validate_token(&token, "other-secret"),
            Err(AppError::Unauthorized)
        ));
    }
}
