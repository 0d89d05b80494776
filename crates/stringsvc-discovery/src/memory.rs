use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use stringsvc_core::{DiscoveryBackend, RegistryError, ServiceInstance};

/// Process-local registry, for tests and for running without a discovery agent.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    instances: RwLock<HashMap<String, ServiceInstance>>,
    failures: AtomicU32,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` registrations fail as if the backend were down.
    pub fn fail_next_registrations(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.instances.read().contains_key(instance_id)
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

#[async_trait]
impl DiscoveryBackend for InMemoryBackend {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), RegistryError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RegistryError::Unavailable("injected failure".to_string()));
        }
        self.instances.write().insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError> {
        self.instances
            .write()
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::InstanceNotFound(instance_id.to_string()))
    }

    async fn instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        let mut found: Vec<ServiceInstance> = self
            .instances
            .read()
            .values()
            .filter(|i| i.name == service_name)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}
