//! # Module API
//!
//! The contract shared between the module host and the code inside module
//! bundles. Bundle payloads link against this crate only; the loading pipeline
//! lives in `module_system`.
//!
//! ## Contents
//!
//! - **Manifest**: bundle metadata parsed from `manifest.json`
//! - **Module contract**: the [`Module`] trait, the author-facing
//!   [`SimpleModule`] trait and the [`create_module!`] export macro
//! - **Host facade**: [`ModuleHost`] and the host-owned [`CoreEvents`]
//! - **Priority events**: [`PriorityEvent`] and [`CancelablePriorityEvent`]
//! - **Localization**: the [`Localization`] sink and [`TranslationTable`]
//! - **Registries**: [`ContextualId`], [`Registry`] and [`RegistryIndex`]
//!
//! ## Writing a module
//!
//! ```rust
//! use module_api::*;
//!
//! struct Compass;
//!
//! impl Compass {
//!     fn new() -> Self {
//!         Compass
//!     }
//! }
//!
//! #[async_trait]
//! impl SimpleModule for Compass {
//!     async fn after_all_loaded(&mut self, context: ModuleContext) -> Result<(), ModuleError> {
//!         context.host.events().shutdown_requested.monitor(|_, request| {
//!             tracing::info!("Compass saw shutdown: {}", request.reason);
//!             Ok(())
//!         });
//!         Ok(())
//!     }
//! }
//!
//! create_module!(Compass);
//! ```
//!
//! ## ABI compatibility
//!
//! Payloads are Rust dynamic libraries handing trait objects across the
//! boundary, so host and payload must be built with the same compiler and the
//! same `module_api` version. The loader compares [`MODULE_API_VERSION`] with
//! the version the payload exports and refuses mismatches.

pub mod events;
pub mod host;
pub mod localization;
pub mod manifest;
pub mod module;
pub mod registry;

pub use events::{
    Cancelable, CancelableCallback, CancelablePriorityEvent, EventBusStats, EventCallback,
    EventError, EventPriority, PriorityEvent, SubscriptionId,
};
pub use host::{CoreEvents, ModuleHost, ModulesLoaded, ShutdownRequest};
pub use localization::{Localization, LocalizationError, TranslationTable, ENGLISH};
pub use manifest::{validate_id, Manifest, ManifestError, MANIFEST_ENTRY};
pub use module::{Module, ModuleAdapter, ModuleContext, ModuleError, SimpleModule};
pub use registry::{ContextualId, Registry, RegistryError, RegistryIndex};

// Re-exported so bundle crates only need one dependency
pub use async_trait::async_trait;
pub use tracing;

/// Version of this crate; payloads must match it exactly.
pub const MODULE_API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// [`MODULE_API_VERSION`] with a trailing NUL, exported by [`create_module!`].
#[doc(hidden)]
pub const MODULE_API_VERSION_NUL: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Name of the factory symbol generated by [`create_module!`].
pub const CREATE_MODULE_SYMBOL: &[u8] = b"create_module";

/// Name of the version symbol generated by [`create_module!`].
pub const MODULE_API_VERSION_SYMBOL: &[u8] = b"module_api_version";

/// Signature of the factory symbol.
#[allow(improper_ctypes_definitions)]
pub type CreateModuleFn = unsafe extern "C" fn() -> *mut dyn Module;

/// Signature of the version symbol.
pub type ModuleApiVersionFn = unsafe extern "C" fn() -> *const std::os::raw::c_char;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constants_agree() {
        assert_eq!(
            MODULE_API_VERSION_NUL.trim_end_matches('\0'),
            MODULE_API_VERSION
        );
        assert!(MODULE_API_VERSION_NUL.ends_with('\0'));
    }
}
