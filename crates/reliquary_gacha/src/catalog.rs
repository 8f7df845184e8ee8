//! # Item Catalogs
//!
//! Read-only reference data for each category: what can be drawn, and at
//! which tier. Catalogs are maintained by the content-management side of the
//! dashboard; the pull engine only reads them.
//!
//! ## TOML layout
//!
//! ```toml
//! [[snoopy]]
//! id = "snoopy_surfer"
//! name = "Surfer Snoopy"
//!
//! [[pokemon]]
//! id = "150"
//! name = "Mewtwo"
//! tier = 3
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::error::{ConfigError, ConfigResult, StoreResult};
use crate::registry::CategoryKey;

/// Catalog item identifier, unique within its category.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Creates an item id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Tier (rarity/stage) of an item. Tier 1 is the most common.
pub type Tier = u8;

const fn default_tier() -> Tier {
    1
}

/// One drawable item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Unique id within the category.
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Tier used by weighted selection. Ignored by uniform selection.
    #[serde(default = "default_tier")]
    pub tier: Tier,
}

impl CatalogItem {
    /// Creates a catalog item.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, tier: Tier) -> Self {
        Self {
            id: ItemId::new(id),
            name: name.into(),
            tier,
        }
    }
}

/// What the caller sees about a drawn item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogItemView {
    /// Item id.
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Item tier.
    pub tier: Tier,
    /// Tier label from the category's tier table, if it has one.
    pub tier_name: Option<String>,
}

/// Read access to per-category catalogs.
pub trait CatalogProvider: Send + Sync {
    /// Lists every item of a category. Unknown categories list as empty.
    ///
    /// # Errors
    ///
    /// `StoreError` if the catalog cannot be read.
    fn list_items(&self, category: &CategoryKey) -> StoreResult<Vec<CatalogItem>>;
}

/// Catalogs held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: RwLock<HashMap<CategoryKey, Vec<CatalogItem>>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the items of a category.
    pub fn insert(&self, category: CategoryKey, items: Vec<CatalogItem>) {
        self.items.write().insert(category, items);
    }

    /// Parses catalogs from TOML, one array of tables per category.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` on malformed TOML, `ConfigError::Invalid` on a
    /// tier of 0, an id repeated within a category, or two category keys
    /// that differ only in case.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let raw: HashMap<String, Vec<CatalogItem>> =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut categories = HashMap::with_capacity(raw.len());
        for (key, items) in raw {
            let mut seen = HashSet::with_capacity(items.len());
            for item in &items {
                if item.tier == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "{key}: item {} has tier 0, tiers start at 1",
                        item.id
                    )));
                }
                if !seen.insert(&item.id) {
                    return Err(ConfigError::Invalid(format!(
                        "{key}: item id {} appears twice",
                        item.id
                    )));
                }
            }
            match categories.entry(CategoryKey::new(&key)) {
                Entry::Occupied(existing) => {
                    return Err(ConfigError::Invalid(format!(
                        "category {} defined twice",
                        existing.key()
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(items);
                }
            }
        }
        Ok(Self {
            items: RwLock::new(categories),
        })
    }
}

impl CatalogProvider for InMemoryCatalog {
    fn list_items(&self, category: &CategoryKey) -> StoreResult<Vec<CatalogItem>> {
        Ok(self.items.read().get(category).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml() {
        let catalog = InMemoryCatalog::from_toml_str(
            r#"
            [[Snoopy]]
            id = "surfer"
            name = "Surfer Snoopy"

            [[pokemon]]
            id = "150"
            name = "Mewtwo"
            tier = 3
            "#,
        )
        .unwrap();

        let snoopy = catalog.list_items(&CategoryKey::new("snoopy")).unwrap();
        assert_eq!(snoopy, vec![CatalogItem::new("surfer", "Surfer Snoopy", 1)]);

        let pokemon = catalog.list_items(&CategoryKey::new("pokemon")).unwrap();
        assert_eq!(pokemon[0].tier, 3);
    }

    #[test]
    fn test_unknown_category_is_empty() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.list_items(&CategoryKey::new("habbo")).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = InMemoryCatalog::from_toml_str(
            r#"
            [[habbo]]
            id = "throne"
            name = "Throne"

            [[habbo]]
            id = "throne"
            name = "Other Throne"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_keys_differing_only_in_case() {
        let result = InMemoryCatalog::from_toml_str(
            r#"
            [[Snoopy]]
            id = "surfer"
            name = "Surfer Snoopy"

            [[snoopy]]
            id = "ace"
            name = "Flying Ace"
            "#,
        );
        assert_eq!(
            result.unwrap_err(),
            ConfigError::Invalid("category snoopy defined twice".into())
        );
    }

    #[test]
    fn test_rejects_tier_zero() {
        let result = InMemoryCatalog::from_toml_str(
            r#"
            [[pokemon]]
            id = "1"
            name = "Bulbasaur"
            tier = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
