//! Token issuance and verification.
//!
//! Tokens are HS256 JWTs carrying the principal as `sub` and a fixed
//! validity window. Both transports gate requests through
//! [`AuthProvider::authorize`], so the HTTP and gRPC front ends cannot
//! disagree on what a valid bearer token is.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::errors::ConfigError;
use crate::time::{Clock, SystemClock};

/// Lifetime of an issued token, in seconds.
pub const TOKEN_TTL_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("incorrect credentials")]
    InvalidCredentials,

    #[error("unauthenticated: {0}")]
    Unauthenticated(&'static str),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String, // Subject (principal)
    pub iat: u64,
    pub exp: u64,
}

/// Static principal -> secret map, loaded once at startup.
#[derive(Clone, Default)]
pub struct CredentialStore {
    entries: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, principal: impl Into<String>, secret: impl Into<String>) -> Self {
        self.entries.insert(principal.into(), secret.into());
        self
    }

    /// Parses `principal:secret` pairs separated by commas.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let mut store = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once(':') {
                Some((principal, secret)) if !principal.is_empty() => {
                    store.entries.insert(principal.to_string(), secret.to_string());
                }
                _ => return Err(ConfigError::MalformedCredential(entry.to_string())),
            }
        }
        if store.entries.is_empty() {
            return Err(ConfigError::NoCredentials);
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unknown principals never match, whatever secret is supplied.
    pub fn verify(&self, principal: &str, secret: &str) -> bool {
        match self.entries.get(principal) {
            Some(stored) => stored.as_bytes().ct_eq(secret.as_bytes()).into(),
            None => false,
        }
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("principals", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct AuthProvider {
    credentials: CredentialStore,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl AuthProvider {
    pub fn new(signing_key: &[u8], credentials: CredentialStore) -> Self {
        Self::with_clock(signing_key, credentials, Arc::new(SystemClock))
    }

    pub fn with_clock(signing_key: &[u8], credentials: CredentialStore, clock: Arc<dyn Clock>) -> Self {
        // Expiry is checked against our own clock with no leeway.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Self {
            credentials,
            encoding: EncodingKey::from_secret(signing_key),
            decoding: DecodingKey::from_secret(signing_key),
            validation,
            clock,
        }
    }

    pub fn issue_token(&self, principal: &str, secret: &str) -> Result<String, AuthError> {
        if !self.credentials.verify(principal, secret) {
            return Err(AuthError::InvalidCredentials);
        }

        let iat = self.clock.now_secs();
        let claims = Claims {
            sub: principal.to_string(),
            iat,
            exp: iat + TOKEN_TTL_SECS,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Returns the principal embedded in a valid, unexpired token.
    pub fn verify_token(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => AuthError::Unauthenticated("signature mismatch"),
                _ => AuthError::Unauthenticated("malformed token"),
            }
        })?;

        if self.clock.now_secs() >= data.claims.exp {
            return Err(AuthError::Unauthenticated("token expired"));
        }
        Ok(data.claims.sub)
    }

    /// Gate shared by every transport: takes the raw `Authorization` value.
    pub fn authorize(&self, header: Option<&str>) -> Result<String, AuthError> {
        let header = header.ok_or(AuthError::Unauthenticated("missing bearer token"))?;
        let token = bearer_token(header).ok_or(AuthError::Unauthenticated("malformed authorization header"))?;
        self.verify_token(token)
    }
}

/// Extracts the token from `Bearer <token>`; the scheme is case-insensitive.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
