//! Import of module locale files into the localization sink.
//!
//! Each loaded module may ship `module/<id>/i18n/<locale>.json` files, which
//! end up under the resource root once the bundle is mounted. Locale names are
//! two letters with an optional region (`en`, `pt_BR`).

use crate::error::TranslationError;
use module_api::Localization;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, info};

static LOCALE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{2}(_[A-Za-z]{2})?$").expect("valid locale regex"));

/// Returns true if `stem` is a locale code such as `en` or `pt_BR`.
pub fn is_locale_name(stem: &str) -> bool {
    LOCALE_NAME.is_match(stem)
}

/// Contents of one locale file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranslationData {
    #[serde(alias = "strings", default)]
    pub strings: BTreeMap<String, String>,
    #[serde(alias = "assets", default)]
    pub assets: BTreeMap<String, String>,
}

/// A locale file or entry that could not be imported.
#[derive(Debug)]
pub struct TranslationFailure {
    pub module: String,
    pub path: PathBuf,
    pub error: TranslationError,
}

/// Counts and failures of a translation import.
#[derive(Debug, Default)]
pub struct TranslationImport {
    pub files: usize,
    pub strings: usize,
    pub assets: usize,
    pub failures: Vec<TranslationFailure>,
}

/// Forwards module locale files to a [`Localization`] sink.
pub struct TranslationBridge {
    resource_root: PathBuf,
    localization: Arc<dyn Localization>,
}

impl TranslationBridge {
    pub fn new(resource_root: impl Into<PathBuf>, localization: Arc<dyn Localization>) -> Self {
        Self {
            resource_root: resource_root.into(),
            localization,
        }
    }

    /// Directory holding the locale files of `module_id`.
    pub fn i18n_directory(&self, module_id: &str) -> PathBuf {
        self.resource_root.join("module").join(module_id).join("i18n")
    }

    /// Imports the locale files of every module, in the given order.
    pub async fn import_all<'a, I>(&self, module_ids: I) -> TranslationImport
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut import = TranslationImport::default();
        for id in module_ids {
            self.import_module(id, &mut import).await;
        }
        info!(
            "🌐 Registered {} strings and {} assets from {} translation files",
            import.strings,
            import.assets,
            import.files
        );
        import
    }

    /// Imports the locale files of one module. A missing directory is fine.
    pub async fn import_module(&self, module_id: &str, import: &mut TranslationImport) {
        let directory = self.i18n_directory(module_id);
        let mut files = match list_locale_files(&directory).await {
            Ok(files) => files,
            Err(e) => {
                error!("Failed to list translations of {}: {}", module_id, e);
                import.failures.push(TranslationFailure {
                    module: module_id.to_string(),
                    path: directory,
                    error: e,
                });
                return;
            }
        };
        files.sort();

        for (locale, path) in files {
            debug!("Loading {} translations for {} from {}", locale, module_id, path.display());
            match self.import_file(&locale, &path, module_id, import).await {
                Ok(()) => import.files += 1,
                Err(e) => {
                    error!("Failed to load translation file {}: {}", path.display(), e);
                    import.failures.push(TranslationFailure {
                        module: module_id.to_string(),
                        path,
                        error: e,
                    });
                }
            }
        }
    }

    async fn import_file(
        &self,
        locale: &str,
        path: &Path,
        module_id: &str,
        import: &mut TranslationImport,
    ) -> Result<(), TranslationError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TranslationError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let data: TranslationData =
            serde_json::from_str(&text).map_err(|e| TranslationError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut record = |result: Result<(), module_api::LocalizationError>| match result {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to register translation from {}: {}", path.display(), e);
                import.failures.push(TranslationFailure {
                    module: module_id.to_string(),
                    path: path.to_path_buf(),
                    error: e.into(),
                });
                false
            }
        };

        let mut strings = 0;
        for (key, value) in &data.strings {
            if record(self.localization.register_string_translation(locale, key, value)) {
                strings += 1;
            }
        }
        let mut assets = 0;
        for (key, value) in &data.assets {
            if record(self.localization.register_asset_translation(locale, key, value)) {
                assets += 1;
            }
        }

        import.strings += strings;
        import.assets += assets;
        Ok(())
    }
}

/// Lists `(locale, path)` for every locale file in `directory`.
async fn list_locale_files(directory: &Path) -> Result<Vec<(String, PathBuf)>, TranslationError> {
    let io_error = |e: std::io::Error| TranslationError::Io {
        path: directory.to_path_buf(),
        reason: e.to_string(),
    };

    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();

        if is_json && is_locale_name(&stem) {
            files.push((stem, path));
        } else {
            debug!("Ignoring non-locale file {}", path.display());
        }
    }
    Ok(files)
}

impl std::fmt::Debug for TranslationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationBridge")
            .field("resource_root", &self.resource_root)
            .finish_non_exhaustive()
    }
}
