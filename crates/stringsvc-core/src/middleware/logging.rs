use std::fmt::Display;
use std::time::Instant;

use super::Method;
use crate::auth::AuthError;
use crate::errors::ServiceError;
use crate::service::StringService;

pub struct LoggingMiddleware<S> {
    next: S,
}

impl<S: StringService> LoggingMiddleware<S> {
    pub fn new(next: S) -> Self {
        Self { next }
    }
}

enum Outcome {
    Output(String),
    Error(String),
}

/// Emits one log record when dropped, on every exit path including unwinding.
struct CallScope<'a> {
    method: Method,
    input: &'a str,
    started: Instant,
    outcome: Option<Outcome>,
}

impl<'a> CallScope<'a> {
    fn begin(method: Method, input: &'a str) -> Self {
        Self {
            method,
            input,
            started: Instant::now(),
            outcome: None,
        }
    }

    fn output(&mut self, output: impl Display) {
        self.outcome = Some(Outcome::Output(output.to_string()));
    }

    fn result<T: Display, E: Display>(&mut self, result: &Result<T, E>) {
        self.outcome = Some(match result {
            Ok(v) => Outcome::Output(v.to_string()),
            Err(e) => Outcome::Error(e.to_string()),
        });
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        let took = self.started.elapsed();
        let method = self.method.as_str();
        match &self.outcome {
            Some(Outcome::Output(output)) => {
                tracing::info!(method, input = self.input, output = %output, took = ?took, "call")
            }
            Some(Outcome::Error(err)) => {
                tracing::info!(method, input = self.input, err = %err, took = ?took, "call failed")
            }
            None => tracing::error!(method, input = self.input, took = ?took, "call aborted"),
        }
    }
}

impl<S: StringService> StringService for LoggingMiddleware<S> {
    fn uppercase(&self, s: &str) -> Result<String, ServiceError> {
        let mut scope = CallScope::begin(Method::Uppercase, s);
        let result = self.next.uppercase(s);
        scope.result(&result);
        result
    }

    fn count(&self, s: &str) -> usize {
        let mut scope = CallScope::begin(Method::Count, s);
        let n = self.next.count(s);
        scope.output(n);
        n
    }

    fn health_check(&self) -> bool {
        let mut scope = CallScope::begin(Method::HealthCheck, "");
        let healthy = self.next.health_check();
        scope.output(healthy);
        healthy
    }

    fn auth(&self, username: &str, password: &str) -> Result<String, AuthError> {
        // Input is the principal only; the token never reaches the log.
        let mut scope = CallScope::begin(Method::Auth, username);
        let result = self.next.auth(username, password);
        scope.result(&result.as_ref().map(|_| "token issued"));
        result
    }
}
