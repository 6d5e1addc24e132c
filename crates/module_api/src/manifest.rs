//! Bundle manifest model.
//!
//! Every bundle carries a `manifest.json` describing the module inside it. The
//! bundle tooling writes PascalCase keys (`Id`, `Name`, `Dependencies`, ...);
//! lowercase keys are accepted as well so hand-written manifests work.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Name of the manifest entry inside a bundle archive.
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Errors raised while parsing or validating a manifest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// The manifest is not valid JSON or has the wrong shape
    #[error("Invalid manifest JSON: {0}")]
    Parse(String),
    /// The id is empty or cannot be used as a file name
    #[error("Invalid module id '{0}'")]
    InvalidId(String),
}

/// Metadata describing one bundle.
///
/// `dependencies` is an ordered list of bundle ids that must be loaded before
/// this one. Ids may reference bundles that do not exist; the resolver drops
/// such bundles. There are no version constraints: `version` is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Manifest {
    /// Globally unique bundle id
    #[serde(alias = "id")]
    pub id: String,
    /// Human readable name, defaults to the id
    #[serde(alias = "name", default)]
    pub name: String,
    #[serde(alias = "description", default)]
    pub description: String,
    #[serde(alias = "author", default)]
    pub author: String,
    /// Opaque version string
    #[serde(alias = "version", default)]
    pub version: String,
    /// Ids of bundles that must load first, in declared order
    #[serde(alias = "dependencies", default, deserialize_with = "null_as_empty")]
    pub dependencies: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Manifest {
    /// Creates a manifest with the given id and no dependencies.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            author: String::new(),
            version: String::new(),
            dependencies: Vec::new(),
        }
    }

    /// Builder-style helper replacing the dependency list.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style helper setting the version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Parses and validates a manifest from raw JSON bytes.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Contents of a `manifest.json` entry
    ///
    /// # Returns
    ///
    /// The validated manifest, with `name` filled in from `id` when absent.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ManifestError> {
        let mut manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|e| ManifestError::Parse(e.to_string()))?;
        validate_id(&manifest.id)?;
        if manifest.name.is_empty() {
            manifest.name = manifest.id.clone();
        }
        Ok(manifest)
    }

    /// Serializes the manifest using the PascalCase bundle layout.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string_pretty(self).map_err(|e| ManifestError::Parse(e.to_string()))
    }

    /// Returns true if this bundle lists `id` among its dependencies.
    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.iter().any(|dep| dep == id)
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} v{}", self.id, self.version)
        }
    }
}

/// Checks that an id is usable as an entry and directory name.
///
/// Ids end up in payload entry names (`<id>.so`) and resource paths
/// (`module/<id>/i18n`), so separators, whitespace and dot segments are refused.
pub fn validate_id(id: &str) -> Result<(), ManifestError> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control());
    if invalid {
        return Err(ManifestError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_case_manifest() {
        let json = br#"{
            "Id": "ui",
            "Name": "User Interface",
            "Description": "HUD and menus",
            "Author": "Core Team",
            "Version": "1.2.0",
            "Dependencies": ["core", "input"]
        }"#;

        let manifest = Manifest::from_json(json).unwrap();
        assert_eq!(manifest.id, "ui");
        assert_eq!(manifest.name, "User Interface");
        assert_eq!(manifest.description, "HUD and menus");
        assert_eq!(manifest.author, "Core Team");
        assert_eq!(manifest.version, "1.2.0");
        assert_eq!(manifest.dependencies, vec!["core", "input"]);
        assert!(manifest.depends_on("input"));
        assert!(!manifest.depends_on("audio"));
    }

    #[test]
    fn test_lowercase_aliases_and_defaults() {
        let json = br#"{ "id": "core", "version": "0.1" }"#;
        let manifest = Manifest::from_json(json).unwrap();
        assert_eq!(manifest.id, "core");
        assert_eq!(manifest.name, "core");
        assert_eq!(manifest.version, "0.1");
        assert!(manifest.description.is_empty());
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn test_null_dependencies_are_empty() {
        let json = br#"{ "Id": "core", "Dependencies": null }"#;
        let manifest = Manifest::from_json(json).unwrap();
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn test_invalid_ids_rejected() {
        for bad in [r#""""#, r#""a b""#, r#""../up""#, r#""..""#, r#""dir\\x""#] {
            let json = format!(r#"{{ "Id": {} }}"#, bad);
            let err = Manifest::from_json(json.as_bytes()).unwrap_err();
            assert!(matches!(err, ManifestError::InvalidId(_)), "accepted {}", bad);
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            Manifest::from_json(b"{ not json"),
            Err(ManifestError::Parse(_))
        ));
        assert!(matches!(
            Manifest::from_json(br#"{ "Name": "no id" }"#),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn test_json_uses_bundle_layout() {
        let manifest = Manifest::new("core")
            .with_version("2.0")
            .with_dependencies(["base"]);
        let json = manifest.to_json().unwrap();
        assert!(json.contains("\"Id\": \"core\""));
        assert!(json.contains("\"Dependencies\""));
        assert_eq!(Manifest::from_json(json.as_bytes()).unwrap(), manifest);
        assert_eq!(manifest.to_string(), "core v2.0");
    }
}
