//! Mounting bundle resources into the host's resource tree.

use crate::error::{ArchiveError, ResourceError};
use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use zip::ZipArchive;

/// The host's resource-resolution layer.
pub trait ResourceHost: Send + Sync {
    /// Makes the files of the bundle at `bundle_path` available to the host.
    ///
    /// Resources mounted earlier by the same host must not be replaced.
    fn mount(&self, bundle_path: &Path) -> Result<(), ResourceError>;
}

/// Mounts bundles by extracting their entries under a resource root.
///
/// A bundle containing `module/ui/i18n/fr.json` ends up at
/// `<root>/module/ui/i18n/fr.json`. The root belongs to the host: it is
/// emptied before the first mount, so files left by an earlier run (or an
/// older version of a bundle) never survive. Within one host, the first
/// bundle in load order to provide a path wins. Entries whose names would
/// escape the root are skipped.
#[derive(Debug)]
pub struct ExtractingResourceHost {
    root: PathBuf,
    prepared: Mutex<bool>,
}

impl ExtractingResourceHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prepared: Mutex::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Extracts the bundle, returning the number of files written.
    pub fn extract(&self, bundle_path: &Path) -> Result<usize, ResourceError> {
        let io_error = |e: std::io::Error| ResourceError::Io(e.to_string());
        let file = File::open(bundle_path).map_err(io_error)?;
        let mut archive = ZipArchive::new(file).map_err(|e| {
            ResourceError::Archive(ArchiveError::Open {
                path: bundle_path.to_path_buf(),
                reason: e.to_string(),
            })
        })?;

        let mut prepared = self.prepared.lock();
        if !*prepared {
            if self.root.exists() {
                debug!(
                    "Clearing resources from a previous run in {}",
                    self.root.display()
                );
                std::fs::remove_dir_all(&self.root).map_err(io_error)?;
            }
            std::fs::create_dir_all(&self.root).map_err(io_error)?;
            *prepared = true;
        }

        let mut written = 0;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| {
                ResourceError::Archive(ArchiveError::Read {
                    entry: format!("#{}", i),
                    reason: e.to_string(),
                })
            })?;

            let Some(relative) = entry.enclosed_name() else {
                warn!(
                    "Skipping unsafe entry {} in {}",
                    entry.name(),
                    bundle_path.display()
                );
                continue;
            };
            let target = self.root.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&target).map_err(io_error)?;
                continue;
            }
            if target.exists() {
                trace!("Keeping existing resource {}", target.display());
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }

            let mut out = File::create(&target).map_err(io_error)?;
            std::io::copy(&mut entry, &mut out).map_err(io_error)?;
            written += 1;
        }

        debug!(
            "Mounted {} resources from {} into {}",
            written,
            bundle_path.display(),
            self.root.display()
        );
        Ok(written)
    }
}

impl ResourceHost for ExtractingResourceHost {
    fn mount(&self, bundle_path: &Path) -> Result<(), ResourceError> {
        self.extract(bundle_path).map(|_| ())
    }
}
