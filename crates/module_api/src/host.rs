//! The facade modules use to reach the host, and the core events it publishes.

use crate::events::{Cancelable, CancelablePriorityEvent, PriorityEvent};
use crate::registry::RegistryIndex;
use std::fmt;
use std::sync::Arc;

/// Host services available to a loaded module.
///
/// A module receives an `Arc<dyn ModuleHost>` right after it is instantiated.
/// The facade is live: `is_loaded` reflects every module activated so far, so a
/// module inspecting it during `after_all_loaded` sees the complete set.
pub trait ModuleHost: Send + Sync {
    /// Returns true if a module with this id finished activation.
    fn is_loaded(&self, id: &str) -> bool;

    /// Ids of loaded modules in load order.
    fn loaded_modules(&self) -> Vec<String>;

    /// Events published by the host.
    fn events(&self) -> Arc<CoreEvents>;

    /// Registry index shared by every module.
    fn registry(&self) -> Arc<RegistryIndex>;
}

/// Payload of [`CoreEvents::modules_loaded`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulesLoaded {
    /// Loaded module ids, in load order
    pub modules: Vec<String>,
    /// Number of bundles that were found but did not load
    pub rejected: usize,
}

/// Payload of [`CoreEvents::shutdown_requested`]. Cancel it to veto shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownRequest {
    /// What triggered the request, e.g. `SIGTERM`
    pub reason: String,
    canceled: bool,
}

impl ShutdownRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            canceled: false,
        }
    }
}

impl Cancelable for ShutdownRequest {
    fn is_canceled(&self) -> bool {
        self.canceled
    }

    fn set_canceled(&mut self, canceled: bool) {
        self.canceled = canceled;
    }
}

/// Process-wide events owned by the host.
pub struct CoreEvents {
    /// Published once after every module has been notified
    pub modules_loaded: PriorityEvent<ModulesLoaded>,
    /// Published when the host is asked to stop; handlers may cancel
    pub shutdown_requested: CancelablePriorityEvent<ShutdownRequest>,
}

impl CoreEvents {
    pub fn new() -> Self {
        Self {
            modules_loaded: PriorityEvent::new("core:modules_loaded"),
            shutdown_requested: CancelablePriorityEvent::new("core:shutdown_requested"),
        }
    }
}

impl Default for CoreEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CoreEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreEvents")
            .field("modules_loaded", &self.modules_loaded)
            .field("shutdown_requested", &self.shutdown_requested)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPriority;

    #[test]
    fn test_shutdown_veto() {
        let events = CoreEvents::new();
        events
            .shutdown_requested
            .subscribe_at(EventPriority::High, |_, request| {
                if request.reason == "SIGINT" {
                    request.cancel();
                }
                Ok(())
            });

        let mut first = ShutdownRequest::new("SIGINT");
        assert!(!events.shutdown_requested.publish("host", &mut first));

        let mut second = ShutdownRequest::new("SIGTERM");
        assert!(events.shutdown_requested.publish("host", &mut second));
    }

    #[test]
    fn test_modules_loaded_payload() {
        let events = CoreEvents::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let s = seen.clone();
        events.modules_loaded.subscribe(move |sender, payload| {
            *s.lock() = Some((sender.to_string(), payload.clone()));
            Ok(())
        });

        let payload = ModulesLoaded {
            modules: vec!["core".to_string(), "ui".to_string()],
            rejected: 1,
        };
        events.modules_loaded.publish("host", &payload);
        assert_eq!(*seen.lock(), Some(("host".to_string(), payload)));
    }
}
