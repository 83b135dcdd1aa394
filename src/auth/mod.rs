//! Caller identity and user management.
//!
//! Every coordinator operation takes an [`AuthenticatedUser`]: ownership is
//! always derived from the authenticated caller, never from client-supplied
//! user ids. Producing an `AuthenticatedUser` is the job of the embedding
//! application's authentication layer, typically via [`UserService`].

use crate::{
    errors::{RepositoryError, ServiceError},
    events::{Event, EventSender},
    models::User,
    repositories::UserRepository,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// The identity of the caller of a coordinator operation.
///
/// Deliberately not constructible from a bare id by accident: the only ways
/// to obtain one are a successful credential check or the explicit
/// `for_user` escape hatch for tests and trusted embedders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    id: Uuid,
}

impl AuthenticatedUser {
    /// Wraps an already-verified user id. Trust boundary: callers must have
    /// authenticated this id themselves.
    pub fn for_user(id: Uuid) -> Self {
        Self { id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl From<&User> for AuthenticatedUser {
    fn from(user: &User) -> Self {
        Self { id: user.id }
    }
}

/// Hashes a password with Argon2 and a random salt.
pub(crate) fn hash_password(password: &str) -> Result<String, RepositoryError> {
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::SaltString;
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| RepositoryError::Storage(anyhow::anyhow!("password hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Verifies a password against a stored Argon2 hash.
pub(crate) fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// User provisioning and credential verification.
#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserRepository>,
    event_sender: EventSender,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>, event_sender: EventSender) -> Self {
        Self {
            users,
            event_sender,
        }
    }

    /// Creates a user with a fresh id. The name must be unique.
    #[instrument(skip(self, password))]
    pub async fn create_user(&self, name: &str, password: &str) -> Result<User, ServiceError> {
        if name.is_empty() {
            return Err(ServiceError::Validation("user name must not be empty".into()));
        }

        let id = Uuid::new_v4();
        self.users
            .create_user(id, name, password)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict => {
                    ServiceError::Conflict(format!("user name {name:?} is taken"))
                }
                other => ServiceError::from_repository("user", id, other),
            })?;

        self.event_sender.send_or_log(Event::UserCreated(id)).await;
        info!(user_id = %id, "created user");
        Ok(User {
            id,
            name: name.to_string(),
        })
    }

    /// Verifies name/password credentials and returns the caller identity.
    /// Fails with NotFound on any mismatch; which part was wrong is never
    /// disclosed.
    #[instrument(skip(self, password))]
    pub async fn authenticate_by_name(
        &self,
        name: &str,
        password: &str,
    ) -> Result<(User, AuthenticatedUser), ServiceError> {
        let user = self
            .users
            .find_user_by_name_and_password(name, password)
            .await
            .map_err(|e| ServiceError::from_repository("user", name, e))?;
        let auth = AuthenticatedUser::from(&user);
        Ok((user, auth))
    }

    /// Verifies id/password credentials and returns the caller identity.
    #[instrument(skip(self, password))]
    pub async fn authenticate_by_id(
        &self,
        id: Uuid,
        password: &str,
    ) -> Result<(User, AuthenticatedUser), ServiceError> {
        let user = self
            .users
            .find_user_by_id_and_password(id, password)
            .await
            .map_err(|e| ServiceError::from_repository("user", id, e))?;
        let auth = AuthenticatedUser::from(&user);
        Ok((user, auth))
    }
}
