use std::sync::Arc;

use crate::auth::{AuthError, AuthProvider};
use crate::errors::ServiceError;

/// The operation set every decorator and the raw service implement identically.
pub trait StringService: Send + Sync {
    fn uppercase(&self, s: &str) -> Result<String, ServiceError>;
    /// Length of `s` in bytes.
    fn count(&self, s: &str) -> usize;
    fn health_check(&self) -> bool;
    fn auth(&self, username: &str, password: &str) -> Result<String, AuthError>;
}

impl<S: StringService + ?Sized> StringService for Box<S> {
    fn uppercase(&self, s: &str) -> Result<String, ServiceError> {
        (**self).uppercase(s)
    }

    fn count(&self, s: &str) -> usize {
        (**self).count(s)
    }

    fn health_check(&self) -> bool {
        (**self).health_check()
    }

    fn auth(&self, username: &str, password: &str) -> Result<String, AuthError> {
        (**self).auth(username, password)
    }
}

impl<S: StringService + ?Sized> StringService for Arc<S> {
    fn uppercase(&self, s: &str) -> Result<String, ServiceError> {
        (**self).uppercase(s)
    }

    fn count(&self, s: &str) -> usize {
        (**self).count(s)
    }

    fn health_check(&self) -> bool {
        (**self).health_check()
    }

    fn auth(&self, username: &str, password: &str) -> Result<String, AuthError> {
        (**self).auth(username, password)
    }
}

/// Undecorated business logic.
pub struct BasicService {
    auth: Arc<AuthProvider>,
}

impl BasicService {
    pub fn new(auth: Arc<AuthProvider>) -> Self {
        Self { auth }
    }
}

impl StringService for BasicService {
    fn uppercase(&self, s: &str) -> Result<String, ServiceError> {
        if s.is_empty() {
            return Err(ServiceError::EmptyInput);
        }
        Ok(s.to_uppercase())
    }

    fn count(&self, s: &str) -> usize {
        s.len()
    }

    fn health_check(&self) -> bool {
        true
    }

    fn auth(&self, username: &str, password: &str) -> Result<String, AuthError> {
        self.auth.issue_token(username, password)
    }
}
