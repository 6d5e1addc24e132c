//! Localization sink and the in-memory translation store.
//!
//! The module system only needs the [`Localization`] trait: it forwards every
//! string and asset entry found in a module's locale files. [`TranslationTable`]
//! is the store the host uses by default; hosts with their own translation
//! server implement the trait themselves.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// Language code every lookup falls back to.
pub const ENGLISH: &str = "en";

/// Errors raised by a localization sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocalizationError {
    /// A string with this key is already registered for the locale
    #[error("Translation key '{key}' already registered for locale '{locale}'")]
    DuplicateKey { locale: String, key: String },
    /// The requested language has no translations
    #[error("Unknown language: {0}")]
    UnknownLanguage(String),
}

/// Destination for translations discovered in module bundles.
pub trait Localization: Send + Sync {
    /// Registers a translated string for `locale`.
    fn register_string_translation(
        &self,
        locale: &str,
        key: &str,
        value: &str,
    ) -> Result<(), LocalizationError>;

    /// Registers an asset remap: when `locale` is active, `key` resolves to `value`.
    fn register_asset_translation(
        &self,
        locale: &str,
        key: &str,
        value: &str,
    ) -> Result<(), LocalizationError>;
}

/// Process-wide translation store with English fallback.
///
/// Languages are created on first registration. Asset remaps are kept per
/// source path as a list of `"<translated path>:<locale>"` entries, the format
/// resource loaders expect.
#[derive(Debug)]
pub struct TranslationTable {
    strings: RwLock<BTreeMap<String, HashMap<String, String>>>,
    asset_remaps: RwLock<HashMap<String, Vec<String>>>,
    current_language: RwLock<String>,
}

impl TranslationTable {
    /// Creates a store containing an empty English table, with English active.
    pub fn new() -> Self {
        let mut strings = BTreeMap::new();
        strings.insert(ENGLISH.to_string(), HashMap::new());
        Self {
            strings: RwLock::new(strings),
            asset_remaps: RwLock::new(HashMap::new()),
            current_language: RwLock::new(ENGLISH.to_string()),
        }
    }

    /// Known language codes, sorted.
    pub fn languages(&self) -> Vec<String> {
        self.strings.read().keys().cloned().collect()
    }

    pub fn current_language(&self) -> String {
        self.current_language.read().clone()
    }

    /// Switches the active language. The language must have been registered.
    pub fn set_current_language(&self, language: &str) -> Result<(), LocalizationError> {
        if !self.strings.read().contains_key(language) {
            return Err(LocalizationError::UnknownLanguage(language.to_string()));
        }
        *self.current_language.write() = language.to_string();
        Ok(())
    }

    /// Looks up `key` in the active language, then English, then returns the key itself.
    pub fn translate(&self, key: &str) -> String {
        let current = self.current_language();
        self.translate_in(&current, key)
            .or_else(|| self.translate_in(ENGLISH, key))
            .unwrap_or_else(|| key.to_string())
    }

    /// Looks up `key` in exactly one language.
    pub fn translate_in(&self, language: &str, key: &str) -> Option<String> {
        self.strings
            .read()
            .get(language)
            .and_then(|table| table.get(key))
            .cloned()
    }

    /// Registered remaps for an asset path.
    pub fn asset_remaps(&self, key: &str) -> Vec<String> {
        self.asset_remaps
            .read()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of strings registered for a language.
    pub fn string_count(&self, language: &str) -> usize {
        self.strings.read().get(language).map_or(0, HashMap::len)
    }
}

impl Default for TranslationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Localization for TranslationTable {
    fn register_string_translation(
        &self,
        locale: &str,
        key: &str,
        value: &str,
    ) -> Result<(), LocalizationError> {
        let mut strings = self.strings.write();
        let table = strings.entry(locale.to_string()).or_default();
        if table.contains_key(key) {
            return Err(LocalizationError::DuplicateKey {
                locale: locale.to_string(),
                key: key.to_string(),
            });
        }
        trace!("Registered translation {}:{}", locale, key);
        table.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn register_asset_translation(
        &self,
        locale: &str,
        key: &str,
        value: &str,
    ) -> Result<(), LocalizationError> {
        self.asset_remaps
            .write()
            .entry(key.to_string())
            .or_default()
            .push(format!("{}:{}", value, locale));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_chain() {
        let table = TranslationTable::new();
        table
            .register_string_translation("en", "menu.play", "Play")
            .unwrap();
        table
            .register_string_translation("en", "menu.quit", "Quit")
            .unwrap();
        table
            .register_string_translation("fr", "menu.play", "Jouer")
            .unwrap();

        assert_eq!(table.translate("menu.play"), "Play");

        table.set_current_language("fr").unwrap();
        assert_eq!(table.translate("menu.play"), "Jouer");
        assert_eq!(table.translate("menu.quit"), "Quit");
        assert_eq!(table.translate("menu.missing"), "menu.missing");
        assert_eq!(table.translate_in("fr", "menu.quit"), None);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let table = TranslationTable::new();
        table.register_string_translation("en", "k", "v1").unwrap();
        let err = table.register_string_translation("en", "k", "v2").unwrap_err();
        assert_eq!(
            err,
            LocalizationError::DuplicateKey {
                locale: "en".to_string(),
                key: "k".to_string()
            }
        );
        assert_eq!(table.translate("k"), "v1");
        // Same key in another locale is fine
        table.register_string_translation("de", "k", "v3").unwrap();
    }

    #[test]
    fn test_languages_created_on_registration() {
        let table = TranslationTable::new();
        assert_eq!(table.languages(), vec!["en"]);
        assert!(table.set_current_language("pt_BR").is_err());

        table
            .register_string_translation("pt_BR", "hello", "Olá")
            .unwrap();
        assert_eq!(table.languages(), vec!["en", "pt_BR"]);
        assert_eq!(table.string_count("pt_BR"), 1);
        assert_eq!(table.string_count("xx"), 0);
        table.set_current_language("pt_BR").unwrap();
        assert_eq!(table.current_language(), "pt_BR");
    }

    #[test]
    fn test_asset_remaps() {
        let table = TranslationTable::new();
        table
            .register_asset_translation("fr", "res://logo.png", "res://logo_fr.png")
            .unwrap();
        table
            .register_asset_translation("de", "res://logo.png", "res://logo_de.png")
            .unwrap();

        assert_eq!(
            table.asset_remaps("res://logo.png"),
            vec!["res://logo_fr.png:fr", "res://logo_de.png:de"]
        );
        assert!(table.asset_remaps("res://other.png").is_empty());
    }
}
