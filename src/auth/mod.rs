//! # Authentication Module
//!
//! Password hashing, JWT issuance and validation, sign-in/sign-up against
//! the credential store, and middleware for securing API endpoints.

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod service;
pub mod store;

pub use jwt::JwtService;
pub use models::{AuthSession, AuthUser, Role, TokenPair};
pub use service::AuthService;

use thiserror::Error;

use crate::database::QueryError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("Email address is not valid")]
    InvalidEmail,

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Failed to hash password: {0}")]
    Hash(String),

    #[error("Failed to issue token: {0}")]
    Token(String),

    #[error("Credential store error: {0}")]
    Store(#[from] QueryError),
}
