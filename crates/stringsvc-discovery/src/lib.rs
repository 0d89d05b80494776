pub mod consul;
pub mod memory;
pub mod registrar;

pub use consul::ConsulBackend;
pub use memory::InMemoryBackend;
pub use registrar::{Registrar, RegistrationMode, RegistrationState, RetryPolicy};
