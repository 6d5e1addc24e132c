//! Module activation.
//!
//! Loads each resolved bundle in order: reads its payload, asks the
//! [`PayloadLoader`] for a module instance, wires the manifest and host
//! facade, releases the archive and mounts the bundle's resources. A failure
//! in one bundle is recorded and the next bundle is processed.

use crate::archive::BundleRecord;
use crate::error::ActivationError;
use crate::facade::HostFacade;
use crate::loader::{debug_symbols_entry_name, payload_entry_name, Payload, PayloadLoader};
use crate::resources::ResourceHost;
use libloading::Library;
use module_api::events::panic_message;
use module_api::{Manifest, Module, ModuleHost};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A module that finished activation.
///
/// Field order matters: the module is dropped before the library that holds
/// its code.
pub struct LoadedModule {
    pub module: Box<dyn Module>,
    pub manifest: Arc<Manifest>,
    library: Option<Library>,
}

impl LoadedModule {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Whether the module's code came from a dynamic library.
    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("manifest", &self.manifest)
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}

/// A bundle that survived resolution but failed to activate.
#[derive(Debug)]
pub struct ActivationFailure {
    pub id: String,
    pub error: ActivationError,
}

/// Output of [`ModuleActivator::activate`].
#[derive(Debug, Default)]
pub struct Activation {
    /// Activated modules in load order
    pub loaded: Vec<LoadedModule>,
    pub failures: Vec<ActivationFailure>,
}

/// Activates resolved bundles.
pub struct ModuleActivator {
    loader: Arc<dyn PayloadLoader>,
    resources: Arc<dyn ResourceHost>,
}

impl ModuleActivator {
    pub fn new(loader: Arc<dyn PayloadLoader>, resources: Arc<dyn ResourceHost>) -> Self {
        Self { loader, resources }
    }

    /// Activates `ordered` bundles one at a time, in order.
    ///
    /// # Arguments
    ///
    /// * `ordered` - Resolved bundles, dependencies first, archives open
    /// * `facade` - Host facade given to each module and updated as they load
    ///
    /// # Returns
    ///
    /// The loaded modules and the per-bundle failures. Every archive has been
    /// released when this returns.
    pub fn activate(&self, ordered: Vec<BundleRecord>, facade: &Arc<HostFacade>) -> Activation {
        let mut activation = Activation::default();

        for mut record in ordered {
            let id = record.manifest.id.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| self.instantiate(&mut record, facade)))
                .unwrap_or_else(|panic| {
                    Err(ActivationError::Panicked(panic_message(panic.as_ref())))
                });

            record.archive.release();

            match outcome {
                Ok(loaded) => {
                    facade.mark_loaded(&id);
                    info!("📦 Loaded module {}", loaded.manifest);
                    if let Err(e) = self.resources.mount(&record.path) {
                        warn!(
                            "Failed to mount resources of {} from {}: {}",
                            id,
                            record.path.display(),
                            e
                        );
                    }
                    activation.loaded.push(loaded);
                }
                Err(e) => {
                    error!("Exception loading module {}: {}", id, e);
                    activation.failures.push(ActivationFailure { id, error: e });
                }
            }
        }

        activation
    }

    fn instantiate(
        &self,
        record: &mut BundleRecord,
        facade: &Arc<HostFacade>,
    ) -> Result<LoadedModule, ActivationError> {
        let manifest = record.manifest.clone();
        let entry = payload_entry_name(&manifest.id);
        let payload = Payload {
            library: record.archive.read_optional_entry(&entry)?,
            debug_symbols: record
                .archive
                .read_optional_entry(&debug_symbols_entry_name(&manifest.id))?,
            entry,
        };

        let instance = self.loader.load(&manifest, payload)?;
        let mut module = instance.module;
        module.set_manifest(manifest.clone());
        let host: Arc<dyn ModuleHost> = facade.clone();
        module.set_host(host);

        Ok(LoadedModule {
            module,
            manifest,
            library: instance.library,
        })
    }
}

impl fmt::Debug for ModuleActivator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleActivator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveCounters;
    use crate::discovery::read_bundle;
    use crate::error::ResourceError;
    use crate::loader::StaticModuleLoader;
    use module_api::{
        async_trait, CoreEvents, ModuleAdapter, ModuleContext, ModuleError, RegistryIndex,
        SimpleModule,
    };
    use parking_lot::Mutex;
    use std::fs::File;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    struct Quiet;

    #[async_trait]
    impl SimpleModule for Quiet {}

    /// Records mounted bundle paths.
    #[derive(Default)]
    struct Mounts {
        paths: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    impl ResourceHost for Mounts {
        fn mount(&self, bundle_path: &Path) -> Result<(), ResourceError> {
            self.paths.lock().push(bundle_path.to_path_buf());
            if self.fail {
                return Err(ResourceError::Io("read-only".to_string()));
            }
            Ok(())
        }
    }

    fn bundle(dir: &Path, id: &str) -> PathBuf {
        let path = dir.join(format!("{}.zip", id));
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        writer
            .start_file("manifest.json", SimpleFileOptions::default())
            .unwrap();
        write!(writer, r#"{{"Id":"{}"}}"#, id).unwrap();
        writer.finish().unwrap();
        path
    }

    fn facade() -> Arc<HostFacade> {
        HostFacade::new(Arc::new(CoreEvents::new()), Arc::new(RegistryIndex::new()))
    }

    #[test]
    fn test_activation_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let counters = ArchiveCounters::new();
        let records = ["core", "broken", "unknown", "ui"]
            .iter()
            .map(|id| read_bundle(&bundle(dir.path(), id), counters.clone()).unwrap())
            .collect();

        let loader = StaticModuleLoader::new()
            .with_module("core", || Box::new(ModuleAdapter::new(Quiet)))
            .with_module("broken", || panic!("constructor exploded"))
            .with_module("ui", || Box::new(ModuleAdapter::new(Quiet)));
        let mounts = Arc::new(Mounts::default());
        let activator = ModuleActivator::new(Arc::new(loader), mounts.clone());
        let facade = facade();

        let activation = activator.activate(records, &facade);

        let loaded: Vec<&str> = activation.loaded.iter().map(|m| m.id()).collect();
        assert_eq!(loaded, vec!["core", "ui"]);
        assert_eq!(facade.loaded_modules(), vec!["core", "ui"]);

        assert_eq!(activation.failures.len(), 2);
        assert!(matches!(
            activation.failures[0].error,
            ActivationError::Panicked(ref message) if message.contains("constructor exploded")
        ));
        assert!(matches!(
            activation.failures[1].error,
            ActivationError::UnknownModule(_)
        ));

        // Only successful bundles are mounted, every archive is released
        assert_eq!(mounts.paths.lock().len(), 2);
        assert_eq!(counters.open_handles(), 0);
        assert_eq!(counters.released(), 4);
    }

    #[test]
    fn test_modules_are_wired() {
        let dir = TempDir::new().unwrap();
        let record = read_bundle(&bundle(dir.path(), "core"), ArchiveCounters::new()).unwrap();
        let loader = StaticModuleLoader::new()
            .with_module("core", || Box::new(ModuleAdapter::new(Quiet)));
        let activator = ModuleActivator::new(Arc::new(loader), Arc::new(Mounts::default()));

        let activation = activator.activate(vec![record], &facade());
        let module = &activation.loaded[0];
        assert_eq!(module.module.manifest().unwrap().id, "core");
        assert!(!module.is_dynamic());
    }

    #[test]
    fn test_mount_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let record = read_bundle(&bundle(dir.path(), "core"), ArchiveCounters::new()).unwrap();
        let loader = StaticModuleLoader::new()
            .with_module("core", || Box::new(ModuleAdapter::new(Quiet)));
        let mounts = Arc::new(Mounts {
            fail: true,
            ..Default::default()
        });
        let activator = ModuleActivator::new(Arc::new(loader), mounts);

        let activation = activator.activate(vec![record], &facade());
        assert_eq!(activation.loaded.len(), 1);
        assert!(activation.failures.is_empty());
    }

    struct Checker {
        saw_core_loaded: Arc<Mutex<Option<bool>>>,
    }

    #[async_trait]
    impl SimpleModule for Checker {
        async fn after_all_loaded(&mut self, context: ModuleContext) -> Result<(), ModuleError> {
            *self.saw_core_loaded.lock() = Some(context.host.is_loaded("core"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_facade_is_live_for_modules() {
        let dir = TempDir::new().unwrap();
        let counters = ArchiveCounters::new();
        let records = ["core", "ui"]
            .iter()
            .map(|id| read_bundle(&bundle(dir.path(), id), counters.clone()).unwrap())
            .collect();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let loader = StaticModuleLoader::new()
            .with_module("core", || Box::new(ModuleAdapter::new(Quiet)))
            .with_module("ui", move || {
                Box::new(ModuleAdapter::new(Checker {
                    saw_core_loaded: s.clone(),
                }))
            });
        let activator = ModuleActivator::new(Arc::new(loader), Arc::new(Mounts::default()));

        let mut activation = activator.activate(records, &facade());
        activation.loaded[1].module.after_all_loaded().await.unwrap();
        assert_eq!(*seen.lock(), Some(true));
    }
}
