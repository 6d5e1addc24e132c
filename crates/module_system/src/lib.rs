//! # Module System
//!
//! Loads module bundles at startup. A bundle is a zip archive holding a
//! `manifest.json`, a payload library named after the module id, optional
//! debug symbols and any resources the module ships (including locale files
//! under `module/<id>/i18n/`).
//!
//! ## Pipeline
//!
//! [`ModuleManager::initialize`] runs these stages once, each finishing before
//! the next starts:
//!
//! 1. **Discovery** ([`discovery`]) - scan the modules directory, read manifests
//! 2. **Resolution** ([`resolver`]) - drop duplicates, missing dependencies and
//!    cycles, then order dependencies first
//! 3. **Activation** ([`activator`]) - load payloads, wire manifest and host
//!    facade, release archives, mount resources
//! 4. **Translations** ([`translation`]) - forward locale files to the
//!    localization sink
//! 5. **Notification** ([`notifier`]) - call `after_all_loaded` in load order
//!
//! Failures never abort the pipeline. Each is logged, recorded in the
//! [`LoadReport`] and only affects the bundle it belongs to.

pub mod activator;
pub mod archive;
pub mod discovery;
pub mod error;
pub mod facade;
pub mod loader;
pub mod manager;
pub mod notifier;
pub mod resolver;
pub mod resources;
pub mod translation;

pub use activator::{Activation, ActivationFailure, LoadedModule, ModuleActivator};
pub use archive::{ArchiveCounters, BundleArchive, BundleRecord};
pub use discovery::{discover_bundles, read_bundle, Discovery, DiscoveryFailure, BUNDLE_EXTENSION};
pub use error::{
    ActivationError, ArchiveError, DiscoveryError, NotificationError, RemovalReason,
    ResourceError, TranslationError,
};
pub use facade::HostFacade;
pub use loader::{
    debug_symbols_entry_name, payload_entry_name, DynamicLibraryLoader, ModuleInstance, Payload,
    PayloadLoader, StaticModuleLoader,
};
pub use manager::{
    LoadReport, ModuleInfo, ModuleManager, ModuleSystemConfig, RejectedBundle,
    MODULE_SYSTEM_SENDER,
};
pub use notifier::{notify_all, NotificationFailure};
pub use resolver::{resolve, RemovedBundle, Resolution, ResolvableBundle};
pub use resources::{ExtractingResourceHost, ResourceHost};
pub use translation::{
    is_locale_name, TranslationBridge, TranslationData, TranslationFailure, TranslationImport,
};
