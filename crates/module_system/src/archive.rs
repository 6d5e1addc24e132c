//! Bundle archives and discovered bundle records.
//!
//! A [`BundleArchive`] is opened during discovery and must be released exactly
//! once, either by the resolver when it drops the bundle or by the activator
//! after loading it. Open and release counts go to a shared [`ArchiveCounters`]
//! so leaks show up in the load report.

use crate::error::ArchiveError;
use module_api::Manifest;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};
use zip::result::ZipError;
use zip::ZipArchive;

/// Upper bound on the buffer reserved up front when reading an entry.
const PREALLOCATION_LIMIT: u64 = 1 << 20;

/// Open/release bookkeeping shared by every archive of one pipeline run.
#[derive(Debug, Default)]
pub struct ArchiveCounters {
    opened: AtomicUsize,
    released: AtomicUsize,
}

impl ArchiveCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Archives opened but not yet released.
    pub fn open_handles(&self) -> usize {
        self.opened().saturating_sub(self.released())
    }
}

/// An open bundle archive.
pub struct BundleArchive {
    path: PathBuf,
    archive: Option<ZipArchive<File>>,
    counters: Arc<ArchiveCounters>,
}

impl BundleArchive {
    /// Opens a zip archive.
    ///
    /// # Arguments
    ///
    /// * `path` - Bundle file
    /// * `counters` - Counters updated on open and release
    pub fn open(path: &Path, counters: Arc<ArchiveCounters>) -> Result<Self, ArchiveError> {
        let open_error = |reason: String| ArchiveError::Open {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| open_error(e.to_string()))?;
        let archive = ZipArchive::new(file).map_err(|e| open_error(e.to_string()))?;

        counters.opened.fetch_add(1, Ordering::SeqCst);
        trace!("Opened bundle archive {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            archive: Some(archive),
            counters,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.archive.is_none()
    }

    fn handle(&mut self) -> Result<&mut ZipArchive<File>, ArchiveError> {
        let path = &self.path;
        self.archive
            .as_mut()
            .ok_or_else(|| ArchiveError::Released(path.clone()))
    }

    /// Reads a whole entry into memory.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        self.read_optional_entry(name)?
            .ok_or_else(|| ArchiveError::EntryMissing(name.to_string()))
    }

    /// Reads an entry, returning `None` if the archive does not contain it.
    pub fn read_optional_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let read_error = |reason: String| ArchiveError::Read {
            entry: name.to_string(),
            reason,
        };
        let archive = self.handle()?;
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(read_error(e.to_string())),
        };

        // The declared size comes from the archive header and is not trusted
        let capacity = entry.size().min(PREALLOCATION_LIMIT) as usize;
        let mut bytes = Vec::with_capacity(capacity);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| read_error(e.to_string()))?;
        Ok(Some(bytes))
    }

    /// Names of every entry in the archive.
    pub fn entry_names(&mut self) -> Result<Vec<String>, ArchiveError> {
        Ok(self.handle()?.file_names().map(str::to_string).collect())
    }

    /// Closes the archive. Returns false if it was already released.
    pub fn release(&mut self) -> bool {
        match self.archive.take() {
            Some(_) => {
                self.counters.released.fetch_add(1, Ordering::SeqCst);
                trace!("Released bundle archive {}", self.path.display());
                true
            }
            None => false,
        }
    }
}

impl Drop for BundleArchive {
    fn drop(&mut self) {
        if !self.is_released() {
            warn!(
                "Bundle archive {} dropped without being released",
                self.path.display()
            );
            self.release();
        }
    }
}

impl fmt::Debug for BundleArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleArchive")
            .field("path", &self.path)
            .field("released", &self.is_released())
            .finish()
    }
}

/// A bundle found by discovery: its file, parsed manifest and open archive.
#[derive(Debug)]
pub struct BundleRecord {
    pub path: PathBuf,
    pub manifest: Arc<Manifest>,
    pub archive: BundleArchive,
}

impl BundleRecord {
    /// Id from the manifest.
    pub fn id(&self) -> &str {
        &self.manifest.id
    }
}
