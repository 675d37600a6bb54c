//! JWT Token Service
//!
//! Handles JWT creation, validation, and claims management for user authentication.
//! Access tokens carry `{id, email, role}`; refresh tokens carry `{id, email}`
//! only and are good for nothing but minting new access tokens.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::models::{AuthUser, Role, TokenPair};
use crate::config::AuthConfig;

const ISSUER: &str = "community-site";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims of an access token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub typ: TokenKind,
}

/// Claims of a refresh token. No role: it is looked up again on refresh.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    pub id: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub typ: TokenKind,
}

/// JWT Service for token operations
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtService {
    /// Create a new JWT service with the provided secret and token lifetimes
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let encoding_key = EncodingKey::from_secret(secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());

        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);

        Self {
            encoding_key,
            decoding_key,
            validation,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.access_ttl, config.refresh_ttl)
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign an access token for `user`
    pub fn generate_access_token(&self, user: &AuthUser) -> Result<String> {
        let (iat, exp) = window(self.access_ttl);
        let claims = AccessClaims {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            iat,
            exp,
            iss: ISSUER.to_string(),
            typ: TokenKind::Access,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .context("Failed to encode access token")
    }

    /// Sign a refresh token for `user`
    pub fn generate_refresh_token(&self, user: &AuthUser) -> Result<String> {
        let (iat, exp) = window(self.refresh_ttl);
        let claims = RefreshClaims {
            id: user.id,
            email: user.email.clone(),
            iat,
            exp,
            iss: ISSUER.to_string(),
            typ: TokenKind::Refresh,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .context("Failed to encode refresh token")
    }

    pub fn generate_token_pair(&self, user: &AuthUser) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.generate_access_token(user)?,
            refresh_token: self.generate_refresh_token(user)?,
        })
    }

    /// Validate and decode an access token
    pub fn validate_token(&self, token: &str) -> Result<TokenData<AccessClaims>> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .context("Failed to validate access token")?;
        anyhow::ensure!(data.claims.typ == TokenKind::Access, "not an access token");
        Ok(data)
    }

    /// Validate and decode a refresh token
    pub fn validate_refresh_token(&self, token: &str) -> Result<TokenData<RefreshClaims>> {
        let data = decode::<RefreshClaims>(token, &self.decoding_key, &self.validation)
            .context("Failed to validate refresh token")?;
        anyhow::ensure!(data.claims.typ == TokenKind::Refresh, "not a refresh token");
        Ok(data)
    }

    /// The user an access token was issued to, or `None` if the token is
    /// expired, tampered with or malformed
    pub fn verify_token(&self, token: &str) -> Option<AuthUser> {
        match self.validate_token(token) {
            Ok(data) => Some(AuthUser {
                id: data.claims.id,
                email: data.claims.email,
                role: data.claims.role,
            }),
            Err(e) => {
                tracing::debug!("Access token rejected: {:#}", e);
                None
            }
        }
    }
}

fn window(ttl: Duration) -> (i64, i64) {
    let now = Utc::now().timestamp();
    (now, now + ttl.as_secs() as i64)
}
