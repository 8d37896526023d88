//! Subscriber registry
//!
//! Process-wide table mapping subscriber identity to the owning SimUe's
//! mailbox, used to route inbound events back to the right coordinator and
//! to guard against two UEs being created with the same identity. Entries
//! are inserted on creation and removed on termination, so the table never
//! grows beyond the set of live UEs.

use std::collections::HashMap;
use std::sync::Mutex;

use ransim_common::events::SimUeEvent;
use ransim_common::{Error, TaskHandle};

/// The subscriber registry.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, TaskHandle<SimUeEvent>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a SimUe under its SUPI.
    ///
    /// Duplicate registration is an error: two live UEs must never share an
    /// identity.
    pub fn register(&self, supi: &str, handle: TaskHandle<SimUeEvent>) -> Result<(), Error> {
        let mut entries = self.lock();
        if entries.contains_key(supi) {
            return Err(Error::Registry(format!("{supi} is already registered")));
        }
        entries.insert(supi.to_string(), handle);
        Ok(())
    }

    /// Removes a SimUe on termination.
    pub fn deregister(&self, supi: &str) {
        self.lock().remove(supi);
    }

    /// Looks up a live SimUe's mailbox by SUPI.
    pub fn lookup(&self, supi: &str) -> Option<TaskHandle<SimUeEvent>> {
        self.lock().get(supi).cloned()
    }

    /// Number of live UEs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no UE is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskHandle<SimUeEvent>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> TaskHandle<SimUeEvent> {
        let (handle, _rx) = TaskHandle::channel(1);
        handle
    }

    #[test]
    fn test_register_lookup_deregister() {
        let registry = Registry::new();
        assert!(registry.is_empty());

        registry.register("imsi-208930000000001", handle()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("imsi-208930000000001").is_some());
        assert!(registry.lookup("imsi-208930000000002").is_none());

        registry.deregister("imsi-208930000000001");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_supi_is_rejected() {
        let registry = Registry::new();
        registry.register("imsi-208930000000001", handle()).unwrap();
        let err = registry
            .register("imsi-208930000000001", handle())
            .unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
        assert_eq!(registry.len(), 1);
    }
}
