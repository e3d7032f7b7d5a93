use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AuthError, AuthService, User, UserId};

/// Minimum password length accepted by the hosted service this mirrors.
const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    id: UserId,
    password: String,
}

/// In-memory account registry implementing `AuthService`.
///
/// Reference backend for tests and local runs. Accounts are keyed by
/// email; passwords are stored as given (nothing here is durable or
/// security-sensitive).
#[derive(Default)]
pub struct InMemoryAuth {
    accounts: Arc<Mutex<HashMap<String, Account>>>,
}

impl InMemoryAuth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AuthService for InMemoryAuth {
    async fn create_account(&self, email: &str, password: &str) -> Result<User, AuthError> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let mut accounts = self.accounts.lock().await;

        if accounts.contains_key(email) {
            return Err(AuthError::EmailInUse(email.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        accounts.insert(
            email.to_string(),
            Account {
                id: id.clone(),
                password: password.to_string(),
            },
        );

        Ok(User {
            id,
            email: email.to_string(),
        })
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let accounts = self.accounts.lock().await;

        // Unknown email and wrong password are indistinguishable to the
        // caller, matching hosted auth services.
        let account = accounts.get(email).ok_or(AuthError::InvalidCredentials)?;

        if account.password != password {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(User {
            id: account.id.clone(),
            email: email.to_string(),
        })
    }

    async fn end_session(&self) -> Result<(), AuthError> {
        // The registry keeps no per-session state to tear down.
        Ok(())
    }
}
