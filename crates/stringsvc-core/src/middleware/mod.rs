//! Cross-cutting decorators around [`StringService`].
//!
//! Each decorator owns exactly one inner service and implements the same
//! trait, so any stack of them is still a `StringService`.

mod instrumenting;
mod logging;

use std::fmt;
use std::sync::Arc;

pub use instrumenting::{AtomicReporter, InstrumentingMiddleware, MetricsReporter, RecorderReporter};
pub use logging::LoggingMiddleware;

use crate::service::StringService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Uppercase,
    Count,
    HealthCheck,
    Auth,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Uppercase => "uppercase",
            Method::Count => "count",
            Method::HealthCheck => "health_check",
            Method::Auth => "auth",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Method::Uppercase => 0,
            Method::Count => 1,
            Method::HealthCheck => 2,
            Method::Auth => 3,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Wrap = Box<dyn FnOnce(Box<dyn StringService>) -> Box<dyn StringService> + Send>;

/// Ordered list of wrapper constructors, applied innermost-first.
#[derive(Default)]
pub struct ServiceChain {
    layers: Vec<Wrap>,
}

impl ServiceChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer outside every layer added so far.
    pub fn layer<F, W>(mut self, wrap: F) -> Self
    where
        F: FnOnce(Box<dyn StringService>) -> W + Send + 'static,
        W: StringService + 'static,
    {
        self.layers
            .push(Box::new(move |inner| Box::new(wrap(inner)) as Box<dyn StringService>));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn build(self, service: impl StringService + 'static) -> Arc<dyn StringService> {
        let mut head: Box<dyn StringService> = Box::new(service);
        for wrap in self.layers {
            head = wrap(head);
        }
        Arc::from(head)
    }
}

/// Logging -> Instrumentation -> `service`, outermost first.
pub fn standard_chain(
    service: impl StringService + 'static,
    reporter: Arc<dyn MetricsReporter>,
) -> Arc<dyn StringService> {
    ServiceChain::new()
        .layer(move |inner| InstrumentingMiddleware::new(inner, reporter))
        .layer(LoggingMiddleware::new)
        .build(service)
}
