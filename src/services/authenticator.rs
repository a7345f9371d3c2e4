//! Username/password authentication for the login endpoint

use std::sync::Arc;
use thiserror::Error;

use crate::middleware::auth::Principal;
use crate::services::directory::{DirectoryError, UserDirectory};

/// Login errors
#[derive(Error, Debug)]
pub enum LoginError {
    /// Unknown user or wrong password; the two are indistinguishable
    #[error("Invalid username or password")]
    BadCredentials,

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Password verification failed: {0}")]
    Hashing(String),
}

/// Checks credentials against the user directory
#[derive(Clone)]
pub struct Authenticator {
    directory: Arc<dyn UserDirectory>,
}

impl Authenticator {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// Verify `password` for `username` and return the user's principal
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Principal, LoginError> {
        let Some(user) = self.directory.find_by_username(username).await? else {
            tracing::debug!(username = %username, "Login for unknown user");
            return Err(LoginError::BadCredentials);
        };

        // Keep bcrypt off the async workers
        let password = password.to_owned();
        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| LoginError::Hashing(e.to_string()))?
            .map_err(|e| LoginError::Hashing(e.to_string()))?;

        if !matches {
            tracing::debug!(username = %username, "Login with wrong password");
            return Err(LoginError::BadCredentials);
        }

        Ok(user.principal())
    }
}
