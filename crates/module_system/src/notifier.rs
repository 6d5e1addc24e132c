//! Final pipeline stage: telling every module the load is complete.

use crate::activator::LoadedModule;
use crate::error::NotificationError;
use futures::FutureExt;
use module_api::events::panic_message;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

/// A module whose `after_all_loaded` failed.
#[derive(Debug)]
pub struct NotificationFailure {
    pub id: String,
    pub error: NotificationError,
}

/// Calls `after_all_loaded` on every module exactly once, in load order.
///
/// Errors and panics are logged and collected; the remaining modules are
/// still notified.
pub async fn notify_all(modules: &mut [LoadedModule]) -> Vec<NotificationFailure> {
    let mut failures = Vec::new();

    for loaded in modules.iter_mut() {
        let id = loaded.manifest.id.clone();
        debug!("Notifying module {}", id);

        let outcome = AssertUnwindSafe(loaded.module.after_all_loaded())
            .catch_unwind()
            .await;
        let error = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => NotificationError::Module(e),
            Err(panic) => NotificationError::Panicked(panic_message(panic.as_ref())),
        };

        error!("Exception during after_all_loaded of module {}: {}", id, error);
        failures.push(NotificationFailure { id, error });
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveCounters;
    use crate::discovery::read_bundle;
    use crate::facade::HostFacade;
    use crate::loader::StaticModuleLoader;
    use crate::resources::ResourceHost;
    use crate::ModuleActivator;
    use module_api::{
        async_trait, CoreEvents, Manifest, Module, ModuleError, ModuleHost, RegistryIndex,
    };
    use parking_lot::Mutex;
    use std::io::Write;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Raw `Module` implementation, bypassing the adapter's panic handling.
    struct Recorder {
        manifest: Option<Arc<Manifest>>,
        log: Arc<Mutex<Vec<String>>>,
        behaviour: &'static str,
    }

    #[async_trait]
    impl Module for Recorder {
        fn set_manifest(&mut self, manifest: Arc<Manifest>) {
            self.manifest = Some(manifest);
        }

        fn manifest(&self) -> Option<Arc<Manifest>> {
            self.manifest.clone()
        }

        fn set_host(&mut self, _host: Arc<dyn ModuleHost>) {}

        async fn after_all_loaded(&mut self) -> Result<(), ModuleError> {
            let id = self.manifest.as_ref().map(|m| m.id.clone()).unwrap_or_default();
            self.log.lock().push(id);
            match self.behaviour {
                "fail" => Err(ModuleError::ExecutionError("refused".to_string())),
                "panic" => panic!("notifier panic"),
                _ => Ok(()),
            }
        }
    }

    struct NoMount;

    impl ResourceHost for NoMount {
        fn mount(&self, _bundle_path: &Path) -> Result<(), crate::error::ResourceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notifies_in_order_despite_failures() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut loader = StaticModuleLoader::new();
        let mut records = Vec::new();

        for (id, behaviour) in [("a", "ok"), ("b", "fail"), ("c", "panic"), ("d", "ok")] {
            let path = dir.path().join(format!("{}.zip", id));
            let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
            writer
                .start_file("manifest.json", zip::write::SimpleFileOptions::default())
                .unwrap();
            write!(writer, r#"{{"Id":"{}"}}"#, id).unwrap();
            writer.finish().unwrap();
            records.push(read_bundle(&path, ArchiveCounters::new()).unwrap());

            let log = log.clone();
            loader.register(id, move || {
                Box::new(Recorder {
                    manifest: None,
                    log: log.clone(),
                    behaviour,
                })
            });
        }

        let facade = HostFacade::new(Arc::new(CoreEvents::new()), Arc::new(RegistryIndex::new()));
        let activator = ModuleActivator::new(Arc::new(loader), Arc::new(NoMount));
        let mut activation = activator.activate(records, &facade);
        assert_eq!(activation.loaded.len(), 4);

        let failures = notify_all(&mut activation.loaded).await;

        assert_eq!(*log.lock(), vec!["a", "b", "c", "d"]);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].id, "b");
        assert!(matches!(failures[0].error, NotificationError::Module(_)));
        assert_eq!(failures[1].id, "c");
        assert!(matches!(
            failures[1].error,
            NotificationError::Panicked(ref message) if message == "notifier panic"
        ));
    }
}
