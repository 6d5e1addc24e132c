//! Sample module bundle payload.
//!
//! Build with `cargo build -p module_greeter --release` and pack the library
//! into a bundle as `greeter.<dll extension>` next to a manifest such as:
//!
//! ```json
//! { "Id": "greeter", "Name": "Greeter", "Version": "0.3.0", "Dependencies": [] }
//! ```

use module_api::tracing::{info, warn};
use module_api::*;
use std::sync::Arc;

/// Module id the greeter expects in its manifest.
pub const GREETER_ID: &str = "greeter";

/// Greets the other modules once everything is loaded and registers its
/// greetings so other modules can look them up.
pub struct GreeterModule {
    greetings: Option<Registry<String>>,
}

impl GreeterModule {
    pub fn new() -> Self {
        Self { greetings: None }
    }

    fn register_greetings(&mut self, context: &ModuleContext) -> Result<(), ModuleError> {
        let registry = Registry::new(
            format!("{}:greetings", context.manifest.id),
            context.host.registry(),
        )
        .map_err(|e| ModuleError::InitializationFailed(e.to_string()))?;

        for module in context.host.loaded_modules() {
            let id = ContextualId::new(context.manifest.id.as_str(), module.as_str());
            registry
                .add(id, format!("Hello, {}!", module))
                .map_err(|e| ModuleError::InitializationFailed(e.to_string()))?;
        }

        self.greetings = Some(registry);
        Ok(())
    }
}

impl Default for GreeterModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimpleModule for GreeterModule {
    async fn after_all_loaded(&mut self, context: ModuleContext) -> Result<(), ModuleError> {
        let others = context.host.loaded_modules();
        info!(
            "👋 {} sees {} loaded modules: {}",
            context.manifest,
            others.len(),
            others.join(", ")
        );

        self.register_greetings(&context)?;

        let events = context.host.events();
        events.modules_loaded.subscribe(|sender, loaded| {
            info!(
                "👋 Greeter: {} reported {} modules ({} not loaded)",
                sender,
                loaded.modules.len(),
                loaded.rejected
            );
            Ok(())
        });
        events.shutdown_requested.monitor(|_, request| {
            if request.is_canceled() {
                warn!("👋 Greeter: shutdown ({}) was canceled", request.reason);
            } else {
                info!("👋 Greeter: goodbye ({})", request.reason);
            }
            Ok(())
        });

        Ok(())
    }
}

create_module!(GreeterModule);
