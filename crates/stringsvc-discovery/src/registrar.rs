//! Registration lifecycle of one service instance.
//!
//! State machine: Unregistered -> Registered -> Deregistered
//!
//! Registration must only happen once the listener is bound, otherwise the
//! backend's first health check fails. Deregistration runs when the serve
//! future finishes, whatever it returned. A registrar dropped while still
//! registered only logs: whoever aborted it owns the cleanup.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use stringsvc_core::{DiscoveryBackend, RegistryError, ServiceInstance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered,
    Deregistered,
}

impl RegistrationState {
    pub fn as_str(self) -> &'static str {
        match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Registered => "registered",
            RegistrationState::Deregistered => "deregistered",
        }
    }
}

/// What to do when every registration attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    /// Refuse to serve.
    Required,
    /// Serve immediately and keep registering in the background.
    BestEffort,
}

/// Exponential backoff between registration attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

pub struct Registrar {
    backend: Arc<dyn DiscoveryBackend>,
    instance: ServiceInstance,
    retry: RetryPolicy,
    state: RegistrationState,
}

impl Registrar {
    pub fn new(backend: Arc<dyn DiscoveryBackend>, instance: ServiceInstance) -> Self {
        Self {
            backend,
            instance,
            retry: RetryPolicy::default(),
            state: RegistrationState::Unregistered,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub async fn register(&mut self) -> Result<(), RegistryError> {
        if self.state != RegistrationState::Unregistered {
            return Err(RegistryError::InvalidTransition(self.state.as_str()));
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        id = %self.instance.id,
                        attempt,
                        retry_in = ?delay,
                        error = %e,
                        "registration failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(id = %self.instance.id, attempts = attempt, error = %e, "registration failed");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&mut self) -> Result<(), RegistryError> {
        self.backend.register(&self.instance).await?;
        self.state = RegistrationState::Registered;
        tracing::info!(
            id = %self.instance.id,
            protocol = %self.instance.protocol(),
            port = self.instance.port,
            "registered with discovery backend"
        );
        Ok(())
    }

    /// Runs the retry policy, then keeps trying every `max_backoff` until it succeeds.
    async fn register_eventually(&mut self) {
        if self.register().await.is_ok() {
            return;
        }
        tracing::error!(
            id = %self.instance.id,
            retry_every = ?self.retry.max_backoff,
            "serving without discovery registration"
        );
        loop {
            tokio::time::sleep(self.retry.max_backoff).await;
            match self.attempt().await {
                Ok(()) => return,
                Err(e) => tracing::warn!(id = %self.instance.id, error = %e, "registration retry failed"),
            }
        }
    }

    /// Retracts the instance. Deregistering an instance that never registered is a no-op.
    pub async fn deregister(&mut self) -> Result<(), RegistryError> {
        match self.state {
            RegistrationState::Unregistered => {
                self.state = RegistrationState::Deregistered;
                Ok(())
            }
            RegistrationState::Registered => {
                // Leave the registered state even on failure; the backend's
                // health checks evict whatever we could not retract.
                self.state = RegistrationState::Deregistered;
                match self.backend.deregister(&self.instance.id).await {
                    Ok(()) => {
                        tracing::info!(id = %self.instance.id, "deregistered from discovery backend");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!(id = %self.instance.id, error = %e, "deregistration failed");
                        Err(e)
                    }
                }
            }
            RegistrationState::Deregistered => Err(RegistryError::InvalidTransition(self.state.as_str())),
        }
    }

    /// Registers, drives `serve` to completion, then deregisters.
    ///
    /// Call this only after the listener behind `serve` is bound. With
    /// [`RegistrationMode::Required`] a failed registration is returned
    /// without polling `serve`. With [`RegistrationMode::BestEffort`] `serve`
    /// is polled at once while registration retries beside it.
    pub async fn scope<F>(mut self, mode: RegistrationMode, serve: F) -> Result<F::Output, RegistryError>
    where
        F: Future,
    {
        if mode == RegistrationMode::Required {
            self.register().await?;
        }

        tokio::pin!(serve);
        let output = if self.state == RegistrationState::Registered {
            serve.await
        } else {
            tokio::select! {
                output = &mut serve => output,
                () = self.register_eventually() => serve.await,
            }
        };
        // Errors are already logged and the backend evicts on missed checks.
        let _ = self.deregister().await;
        Ok(output)
    }
}

impl Drop for Registrar {
    fn drop(&mut self) {
        if self.state == RegistrationState::Registered {
            tracing::warn!(id = %self.instance.id, "registrar dropped while registered");
        }
    }
}
