//! services/api/src/adapters/auth.rs
//!
//! Holds the identity handed over by the external auth provider.

use std::sync::{PoisonError, RwLock};
use study_session_core::ports::{AuthProvider, AuthUser};
use tracing::info;

/// The signed-in identity of this service instance, if any.
#[derive(Default)]
pub struct SessionAuth {
    current: RwLock<Option<AuthUser>>,
}

impl SessionAuth {
    pub fn new(seeded: Option<AuthUser>) -> Self {
        Self {
            current: RwLock::new(seeded),
        }
    }

    pub fn sign_in(&self, user: AuthUser) {
        info!("User {} signed in.", user.user_id);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    /// Clears the identity and returns the one that was signed in.
    pub fn sign_out(&self) -> Option<AuthUser> {
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(user) = &previous {
            info!("User {} signed out.", user.user_id);
        }
        previous
    }
}

impl AuthProvider for SessionAuth {
    fn current_user(&self) -> Option<AuthUser> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
