//! The module manager: runs the loading pipeline and owns the loaded modules.

use crate::activator::{ActivationFailure, LoadedModule, ModuleActivator};
use crate::archive::ArchiveCounters;
use crate::discovery::{discover_bundles, DiscoveryFailure};
use crate::error::RemovalReason;
use crate::facade::HostFacade;
use crate::loader::{DynamicLibraryLoader, PayloadLoader};
use crate::notifier::{notify_all, NotificationFailure};
use crate::resolver::resolve;
use crate::resources::{ExtractingResourceHost, ResourceHost};
use crate::translation::{TranslationBridge, TranslationImport};
use module_api::{CoreEvents, Localization, Manifest, ModuleHost, ModulesLoaded, RegistryIndex};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Sender name used for events published by the module system.
pub const MODULE_SYSTEM_SENDER: &str = "module_system";

/// Directories used by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSystemConfig {
    /// Directory scanned for `*.zip` bundles
    pub modules_directory: PathBuf,
    /// Directory bundle resources are mounted under
    pub resource_root: PathBuf,
    /// Directory payload libraries are staged in before loading
    pub cache_directory: PathBuf,
}

impl Default for ModuleSystemConfig {
    fn default() -> Self {
        Self {
            modules_directory: PathBuf::from("modules"),
            resource_root: PathBuf::from("resources"),
            cache_directory: PathBuf::from("cache"),
        }
    }
}

/// A bundle the resolver refused, as reported after the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedBundle {
    pub id: String,
    pub path: PathBuf,
    pub reason: RemovalReason,
}

/// Everything that happened during [`ModuleManager::initialize`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Loaded module ids in load order
    pub loaded: Vec<String>,
    pub discovery_failures: Vec<DiscoveryFailure>,
    pub rejected: Vec<RejectedBundle>,
    pub activation_failures: Vec<ActivationFailure>,
    pub translations: TranslationImport,
    pub notification_failures: Vec<NotificationFailure>,
    pub archives_opened: usize,
    pub archives_released: usize,
}

impl LoadReport {
    /// Bundles found on disk that did not end up loaded.
    pub fn not_loaded(&self) -> usize {
        self.discovery_failures.len() + self.rejected.len() + self.activation_failures.len()
    }

    /// True if nothing failed at any stage.
    pub fn is_clean(&self) -> bool {
        self.not_loaded() == 0
            && self.translations.failures.is_empty()
            && self.notification_failures.is_empty()
    }

    pub fn rejection_reason(&self, id: &str) -> Option<&RemovalReason> {
        self.rejected.iter().find(|r| r.id == id).map(|r| &r.reason)
    }
}

/// Summary of one loaded module.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub manifest: Arc<Manifest>,
    pub dynamic: bool,
}

/// Discovers, resolves, activates and notifies modules.
///
/// # Examples
///
/// ```rust,no_run
/// use module_api::TranslationTable;
/// use module_system::{ModuleManager, ModuleSystemConfig};
/// use std::sync::Arc;
///
/// # async fn run() {
/// let manager = ModuleManager::new(ModuleSystemConfig::default(), Arc::new(TranslationTable::new()));
/// let report = manager.initialize().await;
/// println!("loaded {:?}", report.loaded);
/// # }
/// ```
pub struct ModuleManager {
    config: ModuleSystemConfig,
    loader: Arc<dyn PayloadLoader>,
    resources: Arc<dyn ResourceHost>,
    localization: Arc<dyn Localization>,
    facade: Arc<HostFacade>,
    events: Arc<CoreEvents>,
    registry: Arc<RegistryIndex>,
    modules: RwLock<Vec<LoadedModule>>,
    initialized: AtomicBool,
}

impl ModuleManager {
    /// Creates a manager using dynamic-library payloads and extracted resources.
    ///
    /// # Arguments
    ///
    /// * `config` - Pipeline directories
    /// * `localization` - Sink receiving module translations
    pub fn new(config: ModuleSystemConfig, localization: Arc<dyn Localization>) -> Self {
        let events = Arc::new(CoreEvents::new());
        let registry = Arc::new(RegistryIndex::new());
        Self {
            loader: Arc::new(DynamicLibraryLoader::new(&config.cache_directory)),
            resources: Arc::new(ExtractingResourceHost::new(&config.resource_root)),
            localization,
            facade: HostFacade::new(events.clone(), registry.clone()),
            events,
            registry,
            modules: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
            config,
        }
    }

    /// Replaces the payload loader.
    pub fn with_loader(mut self, loader: Arc<dyn PayloadLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Replaces the resource host.
    pub fn with_resource_host(mut self, resources: Arc<dyn ResourceHost>) -> Self {
        self.resources = resources;
        self
    }

    /// Shares existing core events with the modules.
    pub fn with_events(mut self, events: Arc<CoreEvents>) -> Self {
        self.facade = HostFacade::new(events.clone(), self.registry.clone());
        self.events = events;
        self
    }

    /// Shares an existing registry index with the modules.
    pub fn with_registry(mut self, registry: Arc<RegistryIndex>) -> Self {
        self.facade = HostFacade::new(self.events.clone(), registry.clone());
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &ModuleSystemConfig {
        &self.config
    }

    /// The facade given to modules.
    pub fn host(&self) -> Arc<dyn ModuleHost> {
        self.facade.clone()
    }

    pub fn events(&self) -> Arc<CoreEvents> {
        self.events.clone()
    }

    pub fn registry(&self) -> Arc<RegistryIndex> {
        self.registry.clone()
    }

    /// Runs the pipeline: discovery, resolution, activation, translations,
    /// notification. Publishes `modules_loaded` when done.
    ///
    /// The pipeline runs once per manager; later calls log a warning and
    /// return an empty report.
    pub async fn initialize(&self) -> LoadReport {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("Module system already initialized, ignoring");
            return LoadReport::default();
        }

        let mut report = LoadReport::default();
        let counters = ArchiveCounters::new();

        info!(
            "🧩 Loading modules from {}",
            self.config.modules_directory.display()
        );

        // Stage 1: discovery
        let discovery =
            match discover_bundles(&self.config.modules_directory, counters.clone()).await {
                Ok(discovery) => discovery,
                Err(e) => {
                    error!("Module discovery failed: {}", e);
                    return report;
                }
            };
        report.discovery_failures = discovery.failures;

        // Stage 2: dependency resolution
        let resolution = resolve(discovery.bundles);
        report.rejected = resolution
            .removed
            .into_iter()
            .map(|removed| RejectedBundle {
                id: removed.record.manifest.id.clone(),
                path: removed.record.path.clone(),
                reason: removed.reason,
            })
            .collect();

        // Stage 3: activation
        let activator = ModuleActivator::new(self.loader.clone(), self.resources.clone());
        let mut activation = activator.activate(resolution.ordered, &self.facade);
        report.activation_failures = activation.failures;
        report.loaded = activation
            .loaded
            .iter()
            .map(|m| m.id().to_string())
            .collect();

        // Stage 4: translations
        let bridge = TranslationBridge::new(&self.config.resource_root, self.localization.clone());
        report.translations = bridge
            .import_all(report.loaded.iter().map(String::as_str))
            .await;

        // Stage 5: notification
        report.notification_failures = notify_all(&mut activation.loaded).await;
        self.modules.write().await.extend(activation.loaded);

        report.archives_opened = counters.opened();
        report.archives_released = counters.released();
        if counters.open_handles() != 0 {
            error!(
                "{} bundle archives were not released",
                counters.open_handles()
            );
        }

        info!(
            "✅ Loaded {} modules ({} not loaded)",
            report.loaded.len(),
            report.not_loaded()
        );
        if !report.is_clean() {
            warn!("Module loading finished with errors");
        }

        self.events.modules_loaded.publish(
            MODULE_SYSTEM_SENDER,
            &ModulesLoaded {
                modules: report.loaded.clone(),
                rejected: report.not_loaded(),
            },
        );

        report
    }

    /// Ids of loaded modules in load order.
    pub async fn loaded_modules(&self) -> Vec<String> {
        self.modules
            .read()
            .await
            .iter()
            .map(|m| m.id().to_string())
            .collect()
    }

    /// Information about one loaded module.
    pub async fn module_info(&self, id: &str) -> Option<ModuleInfo> {
        self.modules
            .read()
            .await
            .iter()
            .find(|m| m.id() == id)
            .map(|m| ModuleInfo {
                manifest: m.manifest.clone(),
                dynamic: m.is_dynamic(),
            })
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("config", &self.config)
            .field("loaded", &self.facade.loaded_count())
            .finish_non_exhaustive()
    }
}
