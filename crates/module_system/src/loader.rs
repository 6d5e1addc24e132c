//! Payload loaders: turning a bundle's code into a module instance.
//!
//! The activator reads the payload entries from the bundle and hands them to a
//! [`PayloadLoader`]. [`DynamicLibraryLoader`] loads real Rust dynamic
//! libraries exported with `create_module!`; [`StaticModuleLoader`] creates
//! modules compiled into the host.

use crate::error::ActivationError;
use libloading::{Library, Symbol};
use module_api::{
    CreateModuleFn, Manifest, Module, ModuleApiVersionFn, CREATE_MODULE_SYMBOL,
    MODULE_API_VERSION, MODULE_API_VERSION_SYMBOL,
};
use std::collections::HashMap;
use std::ffi::CStr;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Entry name of a bundle's code for the current platform, e.g. `core.so`.
pub fn payload_entry_name(id: &str) -> String {
    format!("{}.{}", id, std::env::consts::DLL_EXTENSION)
}

/// Entry name of a bundle's optional debug symbols.
pub fn debug_symbols_entry_name(id: &str) -> String {
    format!("{}.pdb", id)
}

/// Code extracted from a bundle.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    /// Name of the payload entry that was looked up
    pub entry: String,
    /// Library bytes, if the bundle has the entry
    pub library: Option<Vec<u8>>,
    /// Debug symbols, if the bundle has them
    pub debug_symbols: Option<Vec<u8>>,
}

/// A freshly created module and the library backing its code.
pub struct ModuleInstance {
    pub module: Box<dyn Module>,
    pub library: Option<Library>,
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("dynamic", &self.library.is_some())
            .finish()
    }
}

/// Creates the module instance for a bundle.
pub trait PayloadLoader: Send + Sync {
    /// Instantiates the bundle's module.
    ///
    /// # Arguments
    ///
    /// * `manifest` - Manifest of the bundle being activated
    /// * `payload` - Code entries read from the bundle
    fn load(&self, manifest: &Manifest, payload: Payload) -> Result<ModuleInstance, ActivationError>;
}

// ============================================================================
// Dynamic Libraries
// ============================================================================

/// Loads payloads as dynamic libraries.
///
/// The payload is written to `<cache>/<id>/<entry>` (with the debug symbols
/// next to it) and loaded from there. The library stays mapped for the life of
/// the returned [`ModuleInstance`].
#[derive(Debug, Clone)]
pub struct DynamicLibraryLoader {
    cache_directory: PathBuf,
}

impl DynamicLibraryLoader {
    pub fn new(cache_directory: impl Into<PathBuf>) -> Self {
        Self {
            cache_directory: cache_directory.into(),
        }
    }

    pub fn cache_directory(&self) -> &Path {
        &self.cache_directory
    }

    fn stage(&self, manifest: &Manifest, payload: &Payload, bytes: &[u8]) -> Result<PathBuf, ActivationError> {
        let io_error = |e: std::io::Error| ActivationError::Io(e.to_string());
        let directory = self.cache_directory.join(&manifest.id);
        std::fs::create_dir_all(&directory).map_err(io_error)?;

        // Written beside the target and renamed so a half-written library is never loaded
        let library_path = directory.join(&payload.entry);
        let staging_path = directory.join(format!("{}.partial", payload.entry));
        std::fs::write(&staging_path, bytes).map_err(io_error)?;
        std::fs::rename(&staging_path, &library_path).map_err(io_error)?;

        if let Some(symbols) = &payload.debug_symbols {
            std::fs::write(directory.join(debug_symbols_entry_name(&manifest.id)), symbols)
                .map_err(io_error)?;
        }
        Ok(library_path)
    }
}

/// Compares the payload's exported API version with ours.
fn check_api_version(library: &Library) -> Result<(), ActivationError> {
    let version_fn: Symbol<ModuleApiVersionFn> = unsafe {
        library.get(MODULE_API_VERSION_SYMBOL).map_err(|e| {
            ActivationError::SymbolMissing(format!("module_api_version ({})", e))
        })?
    };

    let version_ptr = unsafe { version_fn() };
    let found = if version_ptr.is_null() {
        "<null>".to_string()
    } else {
        unsafe { CStr::from_ptr(version_ptr) }
            .to_string_lossy()
            .to_string()
    };

    if found != MODULE_API_VERSION {
        return Err(ActivationError::VersionMismatch {
            expected: MODULE_API_VERSION.to_string(),
            found,
        });
    }
    Ok(())
}

impl PayloadLoader for DynamicLibraryLoader {
    fn load(&self, manifest: &Manifest, payload: Payload) -> Result<ModuleInstance, ActivationError> {
        let bytes = payload
            .library
            .as_deref()
            .ok_or_else(|| ActivationError::PayloadMissing(payload.entry.clone()))?;
        let library_path = self.stage(manifest, &payload, bytes)?;

        debug!("Loading module library from: {}", library_path.display());
        let library = unsafe {
            Library::new(&library_path).map_err(|e| ActivationError::LoadFailed(e.to_string()))?
        };

        check_api_version(&library)?;

        let module_ptr = {
            let create_module: Symbol<CreateModuleFn> = unsafe {
                library.get(CREATE_MODULE_SYMBOL).map_err(|e| {
                    ActivationError::SymbolMissing(format!("create_module ({})", e))
                })?
            };
            unsafe { create_module() }
        };
        if module_ptr.is_null() {
            return Err(ActivationError::NullInstance);
        }

        let module = unsafe { Box::from_raw(module_ptr) };
        Ok(ModuleInstance {
            module,
            library: Some(library),
        })
    }
}

// ============================================================================
// Linked-in Modules
// ============================================================================

type ModuleFactory = Box<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// Creates modules from factories registered by id.
///
/// Used for modules compiled into the host binary. The bundle still supplies
/// the manifest and resources; its payload entry is ignored.
#[derive(Default)]
pub struct StaticModuleLoader {
    factories: HashMap<String, ModuleFactory>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for `id`.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_module<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.register(id, factory);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }
}

impl fmt::Debug for StaticModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("StaticModuleLoader").field("modules", &ids).finish()
    }
}

impl PayloadLoader for StaticModuleLoader {
    fn load(&self, manifest: &Manifest, _payload: Payload) -> Result<ModuleInstance, ActivationError> {
        let factory = self
            .factories
            .get(&manifest.id)
            .ok_or_else(|| ActivationError::UnknownModule(manifest.id.clone()))?;
        Ok(ModuleInstance {
            module: factory(),
            library: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use module_api::{async_trait, ModuleAdapter, ModuleContext, ModuleError, SimpleModule};
    use tempfile::TempDir;

    struct Quiet;

    #[async_trait]
    impl SimpleModule for Quiet {
        async fn after_all_loaded(&mut self, _context: ModuleContext) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    #[test]
    fn test_entry_names() {
        let entry = payload_entry_name("core");
        assert!(entry.starts_with("core."));
        assert_eq!(entry, format!("core.{}", std::env::consts::DLL_EXTENSION));
        assert_eq!(debug_symbols_entry_name("core"), "core.pdb");
    }

    #[test]
    fn test_static_loader() {
        let loader = StaticModuleLoader::new()
            .with_module("quiet", || Box::new(ModuleAdapter::new(Quiet)));
        assert!(loader.contains("quiet"));

        let instance = loader
            .load(&Manifest::new("quiet"), Payload::default())
            .unwrap();
        assert!(instance.library.is_none());
        assert!(instance.module.manifest().is_none());

        let err = loader
            .load(&Manifest::new("other"), Payload::default())
            .unwrap_err();
        assert!(matches!(err, ActivationError::UnknownModule(id) if id == "other"));
    }

    #[test]
    fn test_dynamic_loader_requires_payload() {
        let cache = TempDir::new().unwrap();
        let loader = DynamicLibraryLoader::new(cache.path());
        let payload = Payload {
            entry: payload_entry_name("core"),
            library: None,
            debug_symbols: None,
        };

        let err = loader.load(&Manifest::new("core"), payload).unwrap_err();
        assert!(matches!(err, ActivationError::PayloadMissing(_)));
    }

    #[test]
    fn test_dynamic_loader_rejects_garbage_library() {
        let cache = TempDir::new().unwrap();
        let loader = DynamicLibraryLoader::new(cache.path());
        let payload = Payload {
            entry: payload_entry_name("core"),
            library: Some(b"not a shared object".to_vec()),
            debug_symbols: Some(b"symbols".to_vec()),
        };

        let err = loader.load(&Manifest::new("core"), payload).unwrap_err();
        assert!(matches!(err, ActivationError::LoadFailed(_)));

        // The payload was staged under the cache directory before loading
        let staged = cache.path().join("core");
        assert!(staged.join(payload_entry_name("core")).is_file());
        assert!(staged.join("core.pdb").is_file());
        assert!(!staged
            .join(format!("{}.partial", payload_entry_name("core")))
            .exists());
    }
}
