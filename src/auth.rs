//! Login and token verification
//!
//! Users come from the `[auth]` configuration table. Tokens are HS256 JWTs
//! whose subject is the user id; permissions are looked up on every
//! verification so configuration changes apply to existing tokens.

use crate::server::config::{AuthConfig, UserConfig};
use chrono::Utc;
use herald_core::Identity;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

const ISSUER: &str = "herald";

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Authentication failures
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("failed to issue token: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
}

/// A verified caller
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub identity: Identity,
    pub email: String,
    /// Events this user may receive
    pub permissions: Vec<String>,
}

impl AuthenticatedUser {
    fn from_config(user: &UserConfig) -> Self {
        Self {
            identity: Identity::new(user.id.clone(), user.name.clone()),
            email: user.email.clone(),
            permissions: user.permissions.clone(),
        }
    }
}

/// Issues and verifies bearer tokens against the configured user table
pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    token_ttl_secs: i64,
    users: Vec<UserConfig>,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);

        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            token_ttl_secs: i64::try_from(config.token_ttl_secs).unwrap_or(i64::MAX),
            users: config.users.clone(),
        }
    }

    /// Check credentials and issue a token
    pub fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(String, AuthenticatedUser), AuthError> {
        let user = self
            .users
            .iter()
            .find(|u| u.email == email)
            .filter(|u| bool::from(u.password.as_bytes().ct_eq(password.as_bytes())))
            .ok_or(AuthError::InvalidCredentials)?;

        let token = self.issue_token(user)?;
        Ok((token, AuthenticatedUser::from_config(user)))
    }

    /// Sign a token for a configured user
    pub fn issue_token(&self, user: &UserConfig) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            iss: ISSUER.to_string(),
            iat: now,
            exp: now.saturating_add(self.token_ttl_secs),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Validate a token and resolve the user it was issued to
    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?;

        self.user(&data.claims.sub)
            .map(AuthenticatedUser::from_config)
            .ok_or(AuthError::UnknownUser(data.claims.sub))
    }

    /// Look up a configured user by id
    pub fn user(&self, id: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_ttl_secs: 60,
            users: vec![
                UserConfig {
                    id: "1".to_string(),
                    email: "cunha".to_string(),
                    password: "123".to_string(),
                    name: "Cunha".to_string(),
                    permissions: vec!["newBloq".to_string(), "newRent".to_string()],
                },
                UserConfig {
                    id: "2".to_string(),
                    email: "daniel".to_string(),
                    password: "456".to_string(),
                    name: "Daniel".to_string(),
                    permissions: vec!["newBloq".to_string()],
                },
            ],
        }
    }

    #[test]
    fn test_login_and_verify() {
        let auth = AuthService::new(&config());
        let (token, user) = auth.login("daniel", "456").unwrap();
        assert_eq!(user.identity.id, "2");

        let verified = auth.verify(&token).unwrap();
        assert_eq!(verified.identity, Identity::new("2", "Daniel"));
        assert_eq!(verified.email, "daniel");
        assert_eq!(verified.permissions, vec!["newBloq"]);
    }

    #[test]
    fn test_login_rejects_bad_credentials() {
        let auth = AuthService::new(&config());
        assert!(matches!(
            auth.login("daniel", "123"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("nobody", "123"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("cunha", ""),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_verify_rejects_foreign_and_garbage_tokens() {
        let auth = AuthService::new(&config());
        let mut other = config();
        other.jwt_secret = "other-secret".to_string();
        let foreign = AuthService::new(&other).issue_token(&other.users[0]).unwrap();

        assert!(matches!(auth.verify(&foreign), Err(AuthError::InvalidToken)));
        assert!(matches!(auth.verify("not.a.jwt"), Err(AuthError::InvalidToken)));
        assert!(matches!(auth.verify(""), Err(AuthError::MissingCredentials)));
    }

    #[test]
    fn test_verify_rejects_removed_user() {
        let issuer = AuthService::new(&config());
        let token = issuer.issue_token(&config().users[1]).unwrap();

        let mut trimmed = config();
        trimmed.users.truncate(1);
        let auth = AuthService::new(&trimmed);
        assert!(matches!(auth.verify(&token), Err(AuthError::UnknownUser(id)) if id == "2"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = AuthService::new(&config());
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "1".to_string(),
            email: "cunha".to_string(),
            iss: ISSUER.to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &auth.encoding).unwrap();
        assert!(matches!(auth.verify(&token), Err(AuthError::InvalidToken)));
    }
}
