use super::{DeviceBackend, DeviceKind};
use anyhow::{anyhow, Result};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Registered phone and fax backends, newest registration first.
#[derive(Default)]
pub struct DeviceRegistry {
    backends: RwLock<Vec<Arc<dyn DeviceBackend>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations shadow earlier ones that claim the same numbers.
    ///
    /// Line events are addressed by backend name, so names must be unique.
    pub fn register(&self, backend: Arc<dyn DeviceBackend>) -> Result<()> {
        let mut backends = match self.backends.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if backends.iter().any(|b| b.name() == backend.name()) {
            return Err(anyhow!("backend {} is already registered", backend.name()));
        }
        info!(
            "registry: registering {} backend {}",
            backend.kind(),
            backend.name()
        );
        backends.insert(0, backend);
        Ok(())
    }

    /// Copy of the current list; lookups never hold the lock while calling
    /// into a backend.
    pub fn snapshot(&self) -> Vec<Arc<dyn DeviceBackend>> {
        match self.backends.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn resolve(&self, number: &str, kind: DeviceKind) -> Option<Arc<dyn DeviceBackend>> {
        self.snapshot()
            .into_iter()
            .find(|backend| backend.kind() == kind && backend.handles(number))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DeviceBackend>> {
        self.snapshot()
            .into_iter()
            .find(|backend| backend.name() == name)
    }

    /// Whether any phone backend owns `number`.
    pub fn is_handled(&self, number: &str) -> bool {
        self.resolve(number, DeviceKind::Phone).is_some()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
