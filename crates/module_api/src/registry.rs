//! Contextual identifiers and typed registries.
//!
//! Modules register content (items, recipes, screens...) under a
//! [`ContextualId`] such as `core:iron_plate`. Each content kind lives in its own
//! [`Registry<T>`], and every registry reports to one shared [`RegistryIndex`]
//! so an id is unique across all registries, not just within one.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

/// Errors raised by registries and contextual id parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The string is not in `context:id` form
    #[error("Bad contextual id format: '{0}'")]
    BadFormat(String),
    /// An object already exists somewhere in the index for this id
    #[error("An object already exists somewhere for the ID '{0}'")]
    AlreadyExists(ContextualId),
    /// A registry with this name was already created on the index
    #[error("Registry '{0}' already exists")]
    DuplicateRegistry(String),
}

/// An id qualified by the context (usually the module id) that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextualId {
    pub context: String,
    pub id: String,
}

impl ContextualId {
    pub fn new(context: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            id: id.into(),
        }
    }

    /// Rendering safe for scene-graph node paths: `:` becomes `$`, `.` becomes `_`.
    pub fn node_path_safe(&self) -> String {
        self.to_string().replace(':', "$").replace('.', "_")
    }
}

impl fmt::Display for ContextualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.context, self.id)
    }
}

/// Parses `context:id`, splitting at the first colon.
impl FromStr for ContextualId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_once(':')
            .map(|(context, id)| ContextualId::new(context, id))
            .ok_or_else(|| RegistryError::BadFormat(s.to_string()))
    }
}

/// Shared index of every registry and every id registered in any of them.
#[derive(Debug, Default)]
pub struct RegistryIndex {
    registries: DashMap<String, ()>,
    entries: DashMap<ContextualId, String>,
}

impl RegistryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if any registry on this index holds `id`.
    pub fn has_data(&self, id: &ContextualId) -> bool {
        self.entries.contains_key(id)
    }

    /// Name of the registry holding `id`, if any.
    pub fn registry_of(&self, id: &ContextualId) -> Option<String> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Names of every registry created on this index, sorted.
    pub fn registries(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Total number of ids across all registries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A named map from [`ContextualId`] to shared objects.
///
/// # Examples
///
/// ```rust
/// use module_api::{ContextualId, Registry, RegistryIndex};
/// use std::sync::Arc;
///
/// let index = Arc::new(RegistryIndex::new());
/// let items: Registry<u32> = Registry::new("items", index.clone()).unwrap();
/// items.add("core:iron".parse().unwrap(), 26).unwrap();
/// assert!(index.has_data(&ContextualId::new("core", "iron")));
/// ```
pub struct Registry<T> {
    id: String,
    index: Arc<RegistryIndex>,
    objects: DashMap<ContextualId, Arc<T>>,
}

impl<T> Registry<T> {
    /// Creates a registry and records it on the index.
    ///
    /// # Arguments
    ///
    /// * `id` - Registry name, unique per index
    /// * `index` - Index shared with every other registry
    pub fn new(id: impl Into<String>, index: Arc<RegistryIndex>) -> Result<Self, RegistryError> {
        let id = id.into();
        match index.registries.entry(id.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateRegistry(id)),
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        Ok(Self {
            id,
            index,
            objects: DashMap::new(),
        })
    }

    /// Registry name.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adds an object. Fails if the id exists in this or any other registry.
    pub fn add(&self, id: ContextualId, object: T) -> Result<(), RegistryError> {
        match self.index.entries.entry(id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(self.id.clone());
                trace!("Adding {} to registry {}", id, self.id);
                self.objects.insert(id, Arc::new(object));
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &ContextualId) -> Option<Arc<T>> {
        self.objects.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &ContextualId) -> bool {
        self.objects.contains_key(id)
    }

    /// Every id in this registry, sorted.
    pub fn get_all(&self) -> Vec<ContextualId> {
        let mut ids: Vec<ContextualId> = self.objects.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.id)
            .field("len", &self.objects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contextual_id_parsing() {
        let id: ContextualId = "core:iron.plate".parse().unwrap();
        assert_eq!(id.context, "core");
        assert_eq!(id.id, "iron.plate");
        assert_eq!(id.to_string(), "core:iron.plate");
        assert_eq!(id.node_path_safe(), "core$iron_plate");

        let nested: ContextualId = "a:b:c".parse().unwrap();
        assert_eq!(nested, ContextualId::new("a", "b:c"));

        assert_eq!(
            "no_colon".parse::<ContextualId>(),
            Err(RegistryError::BadFormat("no_colon".to_string()))
        );
    }

    #[test]
    fn test_registry_add_and_get() {
        let index = Arc::new(RegistryIndex::new());
        let items: Registry<&'static str> = Registry::new("items", index.clone()).unwrap();

        items.add(ContextualId::new("core", "b"), "bolt").unwrap();
        items.add(ContextualId::new("core", "a"), "anvil").unwrap();

        assert_eq!(*items.get(&ContextualId::new("core", "a")).unwrap(), "anvil");
        assert!(items.get(&ContextualId::new("core", "z")).is_none());
        assert_eq!(
            items.get_all(),
            vec![ContextualId::new("core", "a"), ContextualId::new("core", "b")]
        );
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.registry_of(&ContextualId::new("core", "b")),
            Some("items".to_string())
        );
    }

    #[test]
    fn test_ids_unique_across_registries() {
        let index = Arc::new(RegistryIndex::new());
        let items: Registry<u32> = Registry::new("items", index.clone()).unwrap();
        let blocks: Registry<String> = Registry::new("blocks", index.clone()).unwrap();

        let id = ContextualId::new("core", "stone");
        items.add(id.clone(), 1).unwrap();
        assert_eq!(
            blocks.add(id.clone(), "stone".to_string()),
            Err(RegistryError::AlreadyExists(id.clone()))
        );
        assert_eq!(items.add(id.clone(), 2), Err(RegistryError::AlreadyExists(id)));
        assert!(blocks.is_empty());
        assert_eq!(index.registries(), vec!["blocks", "items"]);
    }

    #[test]
    fn test_duplicate_registry_name() {
        let index = Arc::new(RegistryIndex::new());
        let _first: Registry<u8> = Registry::new("items", index.clone()).unwrap();
        let second: Result<Registry<u8>, _> = Registry::new("items", index);
        assert!(matches!(second, Err(RegistryError::DuplicateRegistry(_))));
    }
}
