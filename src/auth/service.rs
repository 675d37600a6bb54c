//! Sign-in, sign-up and token refresh on top of a credential store.

use std::sync::Arc;

use once_cell::sync::Lazy;
use uuid::Uuid;

use crate::auth::jwt::JwtService;
use crate::auth::models::{AuthSession, AuthUser, Role};
use crate::auth::password::{hash_password, verify_password};
use crate::auth::store::{CredentialRecord, CredentialStore};
use crate::auth::AuthError;

/// Verified against when the email is unknown, so both failure paths cost
/// one hash verification
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("not-a-real-password").ok());

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    jwt: Arc<JwtService>,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>, jwt: Arc<JwtService>) -> Self {
        Self { store, jwt }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Check credentials and issue a fresh token pair.
    ///
    /// Unknown email, wrong password and store failures all return `None`.
    pub async fn sign_in(&self, email: &str, password: &str) -> Option<AuthSession> {
        let email = normalize_email(email);

        let record = match self.store.find_by_email(&email).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Failed to look up credentials: {}", e);
                None
            }
        };

        let Some(record) = record else {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                verify_password(password, dummy);
            }
            tracing::info!("Sign-in rejected");
            return None;
        };

        if !verify_password(password, &record.password_hash) {
            tracing::info!("Sign-in rejected");
            return None;
        }

        let user = record.user();
        match self.jwt.generate_token_pair(&user) {
            Ok(tokens) => {
                tracing::info!(user_id = %user.id, "Signed in");
                Some(AuthSession { user, tokens })
            }
            Err(e) => {
                tracing::error!("Failed to issue tokens: {:#}", e);
                None
            }
        }
    }

    /// Register a new account and issue its first token pair. An email that
    /// is already registered is rejected and its stored hash is left alone.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<AuthSession, AuthError> {
        let email = normalize_email(email);
        if !looks_like_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        if password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let record = CredentialRecord {
            id: Uuid::new_v4(),
            email,
            password_hash: hash_password(password)?,
            role,
        };

        // A concurrent sign-up can still win the race; the unique index decides
        if let Err(e) = self.store.insert(&record).await {
            if e.is_unique_violation() {
                return Err(AuthError::EmailTaken);
            }
            return Err(e.into());
        }

        let user = record.user();
        let tokens = self
            .jwt
            .generate_token_pair(&user)
            .map_err(|e| AuthError::Token(format!("{e:#}")))?;
        tracing::info!(user_id = %user.id, role = %user.role, "Registered account");
        Ok(AuthSession { user, tokens })
    }

    /// Mint a new access token from a valid refresh token.
    ///
    /// Refresh tokens carry no role, so the role is read from the stored
    /// credential. An account deleted since sign-in cannot refresh.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Option<String> {
        let claims = match self.jwt.validate_refresh_token(refresh_token) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!("Refresh token rejected: {:#}", e);
                return None;
            }
        };

        let record = match self.store.find_by_id(claims.id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::info!(user_id = %claims.id, "Refresh for unknown account");
                return None;
            }
            Err(e) => {
                tracing::error!("Failed to look up credentials: {}", e);
                return None;
            }
        };

        let user = AuthUser {
            id: claims.id,
            email: claims.email,
            role: record.role,
        };
        self.jwt
            .generate_access_token(&user)
            .map_err(|e| tracing::error!("Failed to issue access token: {:#}", e))
            .ok()
    }

    pub fn verify_token(&self, token: &str) -> Option<AuthUser> {
        self.jwt.verify_token(token)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}
