use jsonwebtoken::{encode, decode, Header, Validation, EncodingKey, DecodingKey};
use serde::{Deserialize, Serialize};
use mongodb::bson::oid::ObjectId;

use crate::models::UserRole;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // User ID
    pub email: String,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtService;

impl JwtService {
    pub fn generate_access_token(
        user_id: &ObjectId,
        email: &str,
        role: UserRole,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let expiry = crate::config::Config::jwt_expiry();
        Self::generate(user_id, email, role, expiry, &crate::config::Config::jwt_secret())
    }

    pub fn generate_refresh_token(
        user_id: &ObjectId,
        email: &str,
        role: UserRole,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let expiry = crate::config::Config::jwt_refresh_expiry();
        Self::generate(
            user_id,
            email,
            role,
            expiry,
            &crate::config::Config::jwt_refresh_secret(),
        )
    }

    fn generate(
        user_id: &ObjectId,
        email: &str,
        role: UserRole,
        expiry: i64,
        secret: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now().timestamp();

        let claims = Claims {
            sub: user_id.to_hex(),
            email: email.to_string(),
            role,
            exp: now + expiry,
            iat: now,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    pub fn verify_token(token: &str, is_refresh: bool) -> Result<Claims, jsonwebtoken::errors::Error> {
        let secret = if is_refresh {
            crate::config::Config::jwt_refresh_secret()
        } else {
            crate::config::Config::jwt_secret()
        };

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_round_trips_claims() {
        let user_id = ObjectId::new();
        let token =
            JwtService::generate_access_token(&user_id, "a@b.io", UserRole::User).unwrap();
        let claims = JwtService::verify_token(&token, false).unwrap();
        assert_eq!(claims.sub, user_id.to_hex());
        assert_eq!(claims.email, "a@b.io");
        assert!(matches!(claims.role, UserRole::User));
    }

    #[test]
    fn refresh_token_is_rejected_as_access_token() {
        let user_id = ObjectId::new();
        let token =
            JwtService::generate_refresh_token(&user_id, "a@b.io", UserRole::Admin).unwrap();
        assert!(JwtService::verify_token(&token, false).is_err());
        assert!(JwtService::verify_token(&token, true).is_ok());
    }

    #[test]
    fn garbage_tokens_fail_verification() {
        assert!(JwtService::verify_token("not.a.jwt", false).is_err());
    }
}
