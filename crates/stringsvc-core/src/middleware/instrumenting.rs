use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::Method;
use crate::auth::AuthError;
use crate::errors::ServiceError;
use crate::service::StringService;

pub const REQUESTS_TOTAL: &str = "stringsvc_requests_total";
pub const REQUEST_DURATION: &str = "stringsvc_request_duration_seconds";
pub const COUNT_RESULT: &str = "stringsvc_count_result";

/// Sink for per-call instrumentation. Implementations must tolerate concurrent calls.
pub trait MetricsReporter: Send + Sync {
    fn request(&self, method: Method, failed: bool, latency: Duration);
    fn count_result(&self, n: usize);
}

/// Reports through whatever `metrics` recorder is installed globally.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderReporter;

impl MetricsReporter for RecorderReporter {
    fn request(&self, method: Method, failed: bool, latency: Duration) {
        let error = if failed { "true" } else { "false" };
        metrics::counter!(REQUESTS_TOTAL, "method" => method.as_str(), "error" => error).increment(1);
        metrics::histogram!(REQUEST_DURATION, "method" => method.as_str(), "error" => error)
            .record(latency.as_secs_f64());
    }

    fn count_result(&self, n: usize) {
        metrics::histogram!(COUNT_RESULT).record(n as f64);
    }
}

/// Lock-free in-process accumulator.
#[derive(Debug, Default)]
pub struct AtomicReporter {
    requests: [[AtomicU64; 2]; 4],
    latency_observations: [AtomicU64; 4],
    count_observations: AtomicU64,
    count_sum: AtomicU64,
}

impl AtomicReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self, method: Method, failed: bool) -> u64 {
        self.requests[method.index()][usize::from(failed)].load(Ordering::Relaxed)
    }

    pub fn latency_observations(&self, method: Method) -> u64 {
        self.latency_observations[method.index()].load(Ordering::Relaxed)
    }

    pub fn count_observations(&self) -> u64 {
        self.count_observations.load(Ordering::Relaxed)
    }

    pub fn count_sum(&self) -> u64 {
        self.count_sum.load(Ordering::Relaxed)
    }
}

impl MetricsReporter for AtomicReporter {
    fn request(&self, method: Method, failed: bool, _latency: Duration) {
        let i = method.index();
        self.requests[i][usize::from(failed)].fetch_add(1, Ordering::Relaxed);
        self.latency_observations[i].fetch_add(1, Ordering::Relaxed);
    }

    fn count_result(&self, n: usize) {
        self.count_observations.fetch_add(1, Ordering::Relaxed);
        self.count_sum.fetch_add(n as u64, Ordering::Relaxed);
    }
}

pub struct InstrumentingMiddleware<S> {
    next: S,
    reporter: Arc<dyn MetricsReporter>,
}

impl<S: StringService> InstrumentingMiddleware<S> {
    pub fn new(next: S, reporter: Arc<dyn MetricsReporter>) -> Self {
        Self { next, reporter }
    }

    fn observe<T>(&self, method: Method, call: impl FnOnce() -> T, failed: impl Fn(&T) -> bool) -> T {
        let started = Instant::now();
        let out = call();
        self.reporter.request(method, failed(&out), started.elapsed());
        out
    }
}

impl<S: StringService> StringService for InstrumentingMiddleware<S> {
    fn uppercase(&self, s: &str) -> Result<String, ServiceError> {
        self.observe(Method::Uppercase, || self.next.uppercase(s), Result::is_err)
    }

    fn count(&self, s: &str) -> usize {
        let n = self.observe(Method::Count, || self.next.count(s), |_| false);
        self.reporter.count_result(n);
        n
    }

    fn health_check(&self) -> bool {
        self.observe(Method::HealthCheck, || self.next.health_check(), |_| false)
    }

    fn auth(&self, username: &str, password: &str) -> Result<String, AuthError> {
        self.observe(Method::Auth, || self.next.auth(username, password), Result::is_err)
    }
}
