//! Error types for every stage of the loading pipeline.
//!
//! None of these escape [`ModuleManager::initialize`](crate::ModuleManager::initialize):
//! each stage logs them and records them in the [`LoadReport`](crate::LoadReport).

use module_api::{LocalizationError, ManifestError, ModuleError};
use std::path::PathBuf;

/// Errors raised while reading a bundle archive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveError {
    /// The file could not be opened or is not a zip archive
    #[error("Failed to open archive {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    /// The handle was already released
    #[error("Archive {0} has already been released")]
    Released(PathBuf),
    /// The archive has no entry with this name
    #[error("Archive entry not found: {0}")]
    EntryMissing(String),
    /// The entry exists but could not be read
    #[error("Failed to read archive entry {entry}: {reason}")]
    Read { entry: String, reason: String },
}

/// Errors raised while discovering bundles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Modules directory unavailable: {0}")]
    DirectoryUnavailable(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("Bad manifest: {0}")]
    Manifest(#[from] ManifestError),
}

/// Why the resolver dropped a bundle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemovalReason {
    /// Another bundle declares the same id
    #[error("Duplicate module id")]
    DuplicateId,
    /// One or more dependencies are not among the surviving bundles
    #[error("Missing dependencies: {}", .missing.join(", "))]
    MissingDependencies { missing: Vec<String> },
    /// The bundle takes part in a dependency cycle
    #[error("Dependency cycle among: {}", .members.join(", "))]
    Cycle { members: Vec<String> },
}

/// Errors raised while activating a single bundle.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    /// The bundle has no payload entry for this platform
    #[error("Payload entry {0} not found in bundle")]
    PayloadMissing(String),
    /// The payload could not be written to the cache directory
    #[error("Failed to stage payload: {0}")]
    Io(String),
    /// The dynamic library could not be loaded
    #[error("Failed to load library: {0}")]
    LoadFailed(String),
    /// A required exported symbol is missing
    #[error("Failed to find {0} function")]
    SymbolMissing(String),
    /// The payload was built against another module API
    #[error("Module API version mismatch: host {expected}, payload {found}")]
    VersionMismatch { expected: String, found: String },
    /// The factory returned null
    #[error("create_module returned null pointer")]
    NullInstance,
    /// No loader knows how to create this module
    #[error("No factory registered for module {0}")]
    UnknownModule(String),
    /// Activation code panicked
    #[error("Activation panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Errors raised while mounting bundle resources.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Resource I/O error: {0}")]
    Io(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Errors raised while importing locale files.
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },
    #[error("Invalid translation file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error(transparent)]
    Forward(#[from] LocalizationError),
}

/// Errors recorded by the activation notifier.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error("after_all_loaded panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_reason_messages() {
        let missing = RemovalReason::MissingDependencies {
            missing: vec!["core".to_string(), "audio".to_string()],
        };
        assert_eq!(missing.to_string(), "Missing dependencies: core, audio");

        let cycle = RemovalReason::Cycle {
            members: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(cycle.to_string(), "Dependency cycle among: a, b");
    }

    #[test]
    fn test_error_conversions() {
        let err: DiscoveryError = ArchiveError::EntryMissing("manifest.json".to_string()).into();
        assert_eq!(err.to_string(), "Archive entry not found: manifest.json");

        let err: TranslationError = LocalizationError::UnknownLanguage("xx".to_string()).into();
        assert!(matches!(err, TranslationError::Forward(_)));
    }
}
