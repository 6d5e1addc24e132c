//! The module contract.
//!
//! [`Module`] is the low-level interface the loader works with. Bundle authors
//! normally implement the smaller [`SimpleModule`] trait and export it with
//! [`create_module!`](crate::create_module), which wraps it in a
//! [`ModuleAdapter`] that stores the manifest and host facade and converts
//! panics into [`ModuleError`]s.

use crate::events::panic_message;
use crate::host::ModuleHost;
use crate::manifest::Manifest;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Errors a module can report to the host.
///
/// # Error Categories
///
/// - **InitializationFailed**: Module could not set itself up
/// - **ExecutionError**: Runtime failure inside module code
/// - **NotAttached**: Called before the host wired manifest and facade
/// - **Runtime**: Panic or other unexpected condition
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// Module initialization failed
    #[error("Module initialization failed: {0}")]
    InitializationFailed(String),
    /// Error occurred during module execution
    #[error("Module execution error: {0}")]
    ExecutionError(String),
    /// The module has no manifest or host yet
    #[error("Module not attached to a host: {0}")]
    NotAttached(String),
    /// Runtime error such as a panic
    #[error("Module runtime error: {0}")]
    Runtime(String),
}

/// Low-level module interface used by the loader.
///
/// # Lifecycle
///
/// 1. **Instantiation**: the bundle's exported factory creates the instance
/// 2. **Wiring**: `set_manifest()` and `set_host()` are called once each
/// 3. **Notification**: `after_all_loaded()` runs once every bundle is loaded
///
/// Modules are never unloaded; they live until the process exits.
#[async_trait]
pub trait Module: Send + Sync {
    /// Attaches the manifest the module was loaded from.
    fn set_manifest(&mut self, manifest: Arc<Manifest>);

    /// The attached manifest, if wiring has happened.
    fn manifest(&self) -> Option<Arc<Manifest>>;

    /// Attaches the host facade.
    fn set_host(&mut self, host: Arc<dyn ModuleHost>);

    /// Called once, in load order, after every bundle has been activated and
    /// every translation registered.
    ///
    /// # Returns
    ///
    /// `Ok(())` on success. Errors are logged by the host and do not affect
    /// other modules.
    async fn after_all_loaded(&mut self) -> Result<(), ModuleError>;
}

/// Everything a module gets to see when it is notified.
#[derive(Clone)]
pub struct ModuleContext {
    /// Manifest of the notified module
    pub manifest: Arc<Manifest>,
    /// Host facade
    pub host: Arc<dyn ModuleHost>,
}

/// High-level module trait for bundle authors.
///
/// # Examples
///
/// ```rust
/// use module_api::*;
///
/// struct Hud;
///
/// impl Hud {
///     fn new() -> Self {
///         Hud
///     }
/// }
///
/// #[async_trait]
/// impl SimpleModule for Hud {
///     async fn after_all_loaded(&mut self, context: ModuleContext) -> Result<(), ModuleError> {
///         if !context.host.is_loaded("core") {
///             return Err(ModuleError::InitializationFailed("core missing".into()));
///         }
///         Ok(())
///     }
/// }
///
/// create_module!(Hud);
/// ```
#[async_trait]
pub trait SimpleModule: Send + Sync + 'static {
    /// Called once after every module has loaded.
    async fn after_all_loaded(&mut self, _context: ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Bridges a [`SimpleModule`] to [`Module`], holding the wiring slots and
/// isolating panics.
pub struct ModuleAdapter<M> {
    inner: M,
    manifest: Option<Arc<Manifest>>,
    host: Option<Arc<dyn ModuleHost>>,
}

impl<M: SimpleModule> ModuleAdapter<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            manifest: None,
            host: None,
        }
    }

    /// The wrapped module.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    fn context(&self) -> Result<ModuleContext, ModuleError> {
        match (&self.manifest, &self.host) {
            (Some(manifest), Some(host)) => Ok(ModuleContext {
                manifest: manifest.clone(),
                host: host.clone(),
            }),
            (None, _) => Err(ModuleError::NotAttached("manifest not set".to_string())),
            (_, None) => Err(ModuleError::NotAttached("host not set".to_string())),
        }
    }
}

#[async_trait]
impl<M: SimpleModule> Module for ModuleAdapter<M> {
    fn set_manifest(&mut self, manifest: Arc<Manifest>) {
        self.manifest = Some(manifest);
    }

    fn manifest(&self) -> Option<Arc<Manifest>> {
        self.manifest.clone()
    }

    fn set_host(&mut self, host: Arc<dyn ModuleHost>) {
        self.host = Some(host);
    }

    async fn after_all_loaded(&mut self) -> Result<(), ModuleError> {
        let context = self.context()?;
        match AssertUnwindSafe(self.inner.after_all_loaded(context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(ModuleError::Runtime(format!(
                "Module panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

/// Exports a [`SimpleModule`] from a bundle payload.
///
/// The type must provide an inherent `fn new() -> Self`. The macro generates
/// the two symbols the loader looks for:
///
/// - `create_module()` - instantiates the module behind a [`ModuleAdapter`];
///   returns null instead of unwinding if construction panics
/// - `module_api_version()` - NUL-terminated version of `module_api` the
///   payload was compiled against
///
/// Only one module can be exported per payload since the symbol names are fixed.
#[macro_export]
macro_rules! create_module {
    ($module_type:ty) => {
        /// Module factory - required export.
        ///
        /// # Safety
        ///
        /// The returned pointer owns a heap allocation; the loader takes it
        /// back with `Box::from_raw`.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn create_module() -> *mut dyn $crate::Module {
            match ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                let module: ::std::boxed::Box<dyn $crate::Module> = ::std::boxed::Box::new(
                    $crate::ModuleAdapter::new(<$module_type>::new()),
                );
                ::std::boxed::Box::into_raw(module)
            })) {
                Ok(module) => module,
                Err(_) => ::std::ptr::null_mut::<$crate::ModuleAdapter<$module_type>>()
                    as *mut dyn $crate::Module,
            }
        }

        /// ABI version check - required export.
        #[no_mangle]
        pub extern "C" fn module_api_version() -> *const ::std::os::raw::c_char {
            $crate::MODULE_API_VERSION_NUL.as_ptr() as *const ::std::os::raw::c_char
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CoreEvents;
    use crate::registry::RegistryIndex;

    struct FixedHost {
        events: Arc<CoreEvents>,
        registry: Arc<RegistryIndex>,
    }

    impl ModuleHost for FixedHost {
        fn is_loaded(&self, id: &str) -> bool {
            id == "core"
        }

        fn loaded_modules(&self) -> Vec<String> {
            vec!["core".to_string()]
        }

        fn events(&self) -> Arc<CoreEvents> {
            self.events.clone()
        }

        fn registry(&self) -> Arc<RegistryIndex> {
            self.registry.clone()
        }
    }

    fn host() -> Arc<dyn ModuleHost> {
        Arc::new(FixedHost {
            events: Arc::new(CoreEvents::new()),
            registry: Arc::new(RegistryIndex::new()),
        })
    }

    #[derive(Default)]
    struct Probe {
        notified_as: Option<String>,
        saw_core: bool,
    }

    #[async_trait]
    impl SimpleModule for Probe {
        async fn after_all_loaded(&mut self, context: ModuleContext) -> Result<(), ModuleError> {
            self.notified_as = Some(context.manifest.id.clone());
            self.saw_core = context.host.is_loaded("core");
            Ok(())
        }
    }

    struct Exploding;

    #[async_trait]
    impl SimpleModule for Exploding {
        async fn after_all_loaded(&mut self, _context: ModuleContext) -> Result<(), ModuleError> {
            panic!("kaboom");
        }
    }

    #[tokio::test]
    async fn test_adapter_wires_context() {
        let mut adapter = ModuleAdapter::new(Probe::default());
        assert!(adapter.manifest().is_none());

        adapter.set_manifest(Arc::new(Manifest::new("ui")));
        adapter.set_host(host());
        adapter.after_all_loaded().await.unwrap();

        assert_eq!(adapter.manifest().unwrap().id, "ui");
        assert_eq!(adapter.inner().notified_as.as_deref(), Some("ui"));
        assert!(adapter.inner().saw_core);
    }

    #[tokio::test]
    async fn test_adapter_requires_wiring() {
        let mut adapter = ModuleAdapter::new(Probe::default());
        adapter.set_host(host());
        let err = adapter.after_all_loaded().await.unwrap_err();
        assert!(matches!(err, ModuleError::NotAttached(_)));
        assert!(adapter.inner().notified_as.is_none());
    }

    #[tokio::test]
    async fn test_adapter_converts_panics() {
        let mut adapter = ModuleAdapter::new(Exploding);
        adapter.set_manifest(Arc::new(Manifest::new("bad")));
        adapter.set_host(host());

        match adapter.after_all_loaded().await {
            Err(ModuleError::Runtime(message)) => assert!(message.contains("kaboom")),
            other => panic!("expected runtime error, got {:?}", other),
        }
    }
}
