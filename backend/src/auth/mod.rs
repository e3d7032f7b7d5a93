pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type UserId = String;

/// Account descriptor returned by the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no active session")]
    NotAuthenticated,

    #[error("email already in use: {0}")]
    EmailInUse(String),

    #[error("password does not meet service requirements")]
    WeakPassword,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("auth backend failure: {0}")]
    Backend(String),
}

/// Hosted authentication engine, as seen by the task client.
///
/// Credential policy (format rules, lockouts, etc.) belongs entirely to
/// the implementation; callers pass credentials through untouched.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn create_account(&self, email: &str, password: &str) -> Result<User, AuthError>;
    async fn authenticate(&self, email: &str, password: &str) -> Result<User, AuthError>;
    async fn end_session(&self) -> Result<(), AuthError>;
}
