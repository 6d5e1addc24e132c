//! Main application entry point for the module host
//!
//! Parses the command line, loads the configuration, runs the module loading
//! pipeline once and keeps the modules alive until a shutdown is accepted.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{anyhow, Result};
use module_api::TranslationTable;
use module_system::{LoadReport, ModuleManager};
use std::sync::Arc;
use tracing::{error, info, warn};

use cli::CliArgs;
use config::AppConfig;

// ============================================================================
// Application
// ============================================================================

/// The host: configuration, translations and the module manager.
pub struct Application {
    config: AppConfig,
    translations: Arc<TranslationTable>,
    manager: ModuleManager,
}

impl Application {
    /// Loads and validates the configuration, applies CLI overrides and sets
    /// up logging.
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path)
            .await
            .map_err(|e| anyhow!("Failed to load config: {}", e))?;
        args.apply_to(&mut config);
        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;
        info!(
            "🚀 Module Host v{} | Config: {} | Modules: {}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display(),
            config.modules.directory
        );

        let translations = Arc::new(TranslationTable::new());
        let manager = ModuleManager::new(config.to_module_system_config(), translations.clone());

        Ok(Self {
            config,
            translations,
            manager,
        })
    }

    /// Loads modules, then waits for shutdown.
    pub async fn run(self) -> Result<()> {
        if self.config.modules.enabled {
            let report = self.manager.initialize().await;
            self.log_report(&report);
        } else {
            warn!("Module loading disabled in configuration");
        }

        let language = &self.config.localization.default_language;
        if let Err(e) = self.translations.set_current_language(language) {
            warn!("Keeping {}: {}", self.translations.current_language(), e);
        }
        info!(
            "🌐 Language: {} (available: {})",
            self.translations.current_language(),
            self.translations.languages().join(", ")
        );

        info!("✅ Module host is running");
        info!("🛑 Press Ctrl+C to shut down");

        let events = self.manager.events();
        signals::wait_for_shutdown(&events).await?;

        info!("🛑 Shutting down");
        let stats = events.shutdown_requested.stats();
        info!(
            "📊 Shutdown handlers: {} | Handler failures: {}",
            stats.handlers, stats.handler_failures
        );
        info!("👋 Module host stopped");
        Ok(())
    }

    fn log_report(&self, report: &LoadReport) {
        info!("📋 Load summary:");
        info!("  📦 Loaded: {}", report.loaded.join(", "));
        for rejected in &report.rejected {
            warn!("  ⛔ {} ({}): {}", rejected.id, rejected.path.display(), rejected.reason);
        }
        for failure in &report.discovery_failures {
            warn!("  ⛔ {}: {}", failure.path.display(), failure.error);
        }
        for failure in &report.activation_failures {
            warn!("  ⛔ {}: {}", failure.id, failure.error);
        }
        info!(
            "  🌐 Translations: {} files, {} strings, {} assets",
            report.translations.files, report.translations.strings, report.translations.assets
        );
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ Failed to start module host: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Module host error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
