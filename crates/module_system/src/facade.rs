//! The [`ModuleHost`] implementation handed to every module.

use module_api::{CoreEvents, ModuleHost, RegistryIndex};
use parking_lot::RwLock;
use std::sync::Arc;

/// Live view of the module system shared with loaded modules.
///
/// The activator marks each module as loaded right after wiring it, so the
/// facade always reflects load order.
#[derive(Debug)]
pub struct HostFacade {
    loaded: RwLock<Vec<String>>,
    events: Arc<CoreEvents>,
    registry: Arc<RegistryIndex>,
}

impl HostFacade {
    pub fn new(events: Arc<CoreEvents>, registry: Arc<RegistryIndex>) -> Arc<Self> {
        Arc::new(Self {
            loaded: RwLock::new(Vec::new()),
            events,
            registry,
        })
    }

    /// Records a module as loaded.
    pub(crate) fn mark_loaded(&self, id: &str) {
        self.loaded.write().push(id.to_string());
    }

    /// Number of loaded modules.
    pub fn loaded_count(&self) -> usize {
        self.loaded.read().len()
    }
}

impl ModuleHost for HostFacade {
    fn is_loaded(&self, id: &str) -> bool {
        self.loaded.read().iter().any(|loaded| loaded == id)
    }

    fn loaded_modules(&self) -> Vec<String> {
        self.loaded.read().clone()
    }

    fn events(&self) -> Arc<CoreEvents> {
        self.events.clone()
    }

    fn registry(&self) -> Arc<RegistryIndex> {
        self.registry.clone()
    }
}
