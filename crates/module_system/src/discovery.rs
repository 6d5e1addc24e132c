//! Bundle discovery.
//!
//! Scans the modules directory for `*.zip` files and reads each bundle's
//! manifest. No payload code is touched here.

use crate::archive::{ArchiveCounters, BundleArchive, BundleRecord};
use crate::error::DiscoveryError;
use module_api::{Manifest, MANIFEST_ENTRY};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// File extension of bundle archives.
pub const BUNDLE_EXTENSION: &str = "zip";

/// A directory entry that looked like a bundle but could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFailure {
    pub path: PathBuf,
    pub error: DiscoveryError,
}

/// Result of a directory scan.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Readable bundles in file-name order, archives still open
    pub bundles: Vec<BundleRecord>,
    pub failures: Vec<DiscoveryFailure>,
}

fn is_bundle_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    let zip = path
        .extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(BUNDLE_EXTENSION))
        .unwrap_or(false);
    !hidden && zip
}

/// Opens one bundle and parses its manifest.
///
/// The archive is released again if the manifest cannot be read, so a failed
/// bundle never leaves a handle behind.
pub fn read_bundle(path: &Path, counters: Arc<ArchiveCounters>) -> Result<BundleRecord, DiscoveryError> {
    let mut archive = BundleArchive::open(path, counters)?;
    let manifest = archive
        .read_entry(MANIFEST_ENTRY)
        .map_err(DiscoveryError::from)
        .and_then(|bytes| Manifest::from_json(&bytes).map_err(DiscoveryError::from));

    match manifest {
        Ok(manifest) => Ok(BundleRecord {
            path: path.to_path_buf(),
            manifest: Arc::new(manifest),
            archive,
        }),
        Err(e) => {
            archive.release();
            Err(e)
        }
    }
}

/// Scans `directory` for bundles.
///
/// A missing directory is created and yields an empty result. Unreadable
/// bundles are logged, recorded as failures and skipped.
///
/// # Arguments
///
/// * `directory` - Modules directory
/// * `counters` - Archive counters for this run
///
/// # Returns
///
/// Readable bundles in file-name order, or an error if the directory itself
/// cannot be listed.
pub async fn discover_bundles(
    directory: &Path,
    counters: Arc<ArchiveCounters>,
) -> Result<Discovery, DiscoveryError> {
    if !directory.exists() {
        warn!(
            "Modules directory does not exist, creating: {}",
            directory.display()
        );
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|e| DiscoveryError::DirectoryUnavailable(e.to_string()))?;
        return Ok(Discovery::default());
    }

    let mut entries = tokio::fs::read_dir(directory).await.map_err(|e| {
        DiscoveryError::DirectoryUnavailable(format!(
            "Failed to read modules directory {}: {}",
            directory.display(),
            e
        ))
    })?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        DiscoveryError::DirectoryUnavailable(format!("Failed to read directory entry: {}", e))
    })? {
        let path = entry.path();
        // Follows symlinks, so a link to a bundle counts as a bundle
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if is_file && is_bundle_file(&path) {
            candidates.push(path);
        } else {
            debug!("Skipping non-bundle entry {}", path.display());
        }
    }
    candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut discovery = Discovery::default();
    for path in candidates {
        match read_bundle(&path, counters.clone()) {
            Ok(record) => {
                debug!("Found bundle {} at {}", record.manifest, path.display());
                discovery.bundles.push(record);
            }
            Err(e) => {
                error!("Failed to read bundle {}: {}", path.display(), e);
                discovery.failures.push(DiscoveryFailure { path, error: e });
            }
        }
    }

    info!(
        "🔍 Discovered {} bundles in {} ({} unreadable)",
        discovery.bundles.len(),
        directory.display(),
        discovery.failures.len()
    );
    Ok(discovery)
}
