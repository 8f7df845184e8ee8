//! # Category Registry
//!
//! Static configuration of every gacha banner: what a pull costs, which
//! currency pays for it, how the drawn item is owned, and how it is drawn.
//!
//! The registry is built once at startup (from TOML or [`CategoryRegistry::builtin`])
//! and never written afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult, GachaResult, PullError};
use crate::ledger::Currency;
use crate::ownership::OwnershipPolicy;
use crate::selector::Selector;
use crate::tier::TierTable;

/// Default registry shipped with the crate.
const BUILTIN_CATEGORIES: &str = include_str!("../data/categories.toml");

/// Case-insensitive category key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryKey(String);

impl CategoryKey {
    /// Creates a key, normalizing to lowercase.
    #[must_use]
    pub fn new(key: &str) -> Self {
        Self(key.trim().to_lowercase())
    }

    /// The normalized key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration of one category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryConfig {
    /// Category key.
    pub key: CategoryKey,
    /// Price of one pull (or one pack). Always positive.
    pub cost: u64,
    /// Currency debited.
    pub currency: Currency,
    /// Ownership and duplicate behavior.
    pub policy: OwnershipPolicy,
    /// Draw strategy.
    pub selector: Selector,
    /// Draws per pack.
    pub pack_size: u8,
}

impl CategoryConfig {
    /// Refund credited for one duplicate: `floor(cost / divisor)`.
    #[must_use]
    pub const fn refund(&self, divisor: u64) -> u64 {
        self.cost / divisor
    }

    /// Label of a tier, for tiered categories.
    #[must_use]
    pub fn tier_name(&self, tier: crate::catalog::Tier) -> Option<&str> {
        self.selector.tier_table().and_then(|table| table.name(tier))
    }
}

const fn default_pack_size() -> u8 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTier {
    name: String,
    probability: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCategory {
    cost: u64,
    currency: Currency,
    ownership: OwnershipPolicy,
    #[serde(default = "default_pack_size")]
    pack_size: u8,
    #[serde(default)]
    tiers: Vec<RawTier>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRegistry {
    categories: HashMap<String, RawCategory>,
}

impl RawCategory {
    fn into_config(self, key: CategoryKey) -> ConfigResult<CategoryConfig> {
        if self.cost == 0 {
            return Err(ConfigError::Invalid(format!("{key}: cost must be positive")));
        }
        if self.pack_size == 0 {
            return Err(ConfigError::Invalid(format!("{key}: pack_size must be positive")));
        }

        let selector = if self.tiers.is_empty() {
            Selector::Uniform
        } else {
            let tiers = self
                .tiers
                .into_iter()
                .map(|tier| (tier.name, tier.probability))
                .collect();
            let table = TierTable::from_named_probabilities(tiers).map_err(|err| match err {
                ConfigError::Invalid(reason) | ConfigError::Parse(reason) => {
                    ConfigError::Invalid(format!("{key}: {reason}"))
                }
            })?;
            Selector::Tiered(table)
        };

        Ok(CategoryConfig {
            key,
            cost: self.cost,
            currency: self.currency,
            policy: self.ownership,
            selector,
            pack_size: self.pack_size,
        })
    }
}

/// All configured categories.
#[derive(Clone, Debug, Default)]
pub struct CategoryRegistry {
    categories: HashMap<CategoryKey, CategoryConfig>,
}

impl CategoryRegistry {
    /// Builds a registry from already-validated configs.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` on a repeated key, a zero cost or a zero pack size.
    pub fn from_configs(configs: impl IntoIterator<Item = CategoryConfig>) -> ConfigResult<Self> {
        let mut categories = HashMap::new();
        for config in configs {
            if config.cost == 0 || config.pack_size == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}: cost and pack_size must be positive",
                    config.key
                )));
            }
            let key = config.key.clone();
            if categories.insert(key.clone(), config).is_some() {
                return Err(ConfigError::Invalid(format!("category {key} defined twice")));
            }
        }
        Ok(Self { categories })
    }

    /// Parses a registry from TOML.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` on malformed TOML, `ConfigError::Invalid` on
    /// impossible values.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let raw: RawRegistry =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let configs = raw
            .categories
            .into_iter()
            .map(|(key, category)| category.into_config(CategoryKey::new(&key)))
            .collect::<ConfigResult<Vec<_>>>()?;
        Self::from_configs(configs)
    }

    /// Reads and parses a registry file.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` if the file cannot be read, otherwise as
    /// [`CategoryRegistry::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// The five banners of the dashboard.
    ///
    /// # Errors
    ///
    /// Only if the embedded TOML is broken.
    pub fn builtin() -> ConfigResult<Self> {
        Self::from_toml_str(BUILTIN_CATEGORIES)
    }

    /// Resolves a category key (case-insensitive).
    ///
    /// # Errors
    ///
    /// `PullError::CategoryNotFound` if no such category exists.
    pub fn get(&self, key: &str) -> GachaResult<&CategoryConfig> {
        self.categories
            .get(&CategoryKey::new(key))
            .ok_or_else(|| PullError::CategoryNotFound(key.to_string()))
    }

    /// All keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&CategoryKey> {
        let mut keys: Vec<_> = self.categories.keys().collect();
        keys.sort();
        keys
    }

    /// Number of categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// True if no category is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_banners() {
        let registry = CategoryRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 5);

        let pokemon = registry.get("pokemon").unwrap();
        assert_eq!(pokemon.cost, 5);
        assert_eq!(pokemon.currency, Currency::TemuTokens);
        assert_eq!(pokemon.policy, OwnershipPolicy::InstancedDedup);
        assert_eq!(pokemon.selector.tier_table().unwrap().len(), 3);
        assert_eq!(pokemon.tier_name(3), Some("legendary"));

        let yugioh = registry.get("yugioh").unwrap();
        assert_eq!(yugioh.pack_size, 6);
        assert_eq!(yugioh.policy, OwnershipPolicy::InstancedNoDedup);

        let snoopy = registry.get("snoopy").unwrap();
        assert_eq!(snoopy.currency, Currency::GatillaGold);
        assert_eq!(snoopy.selector, Selector::Uniform);

        let persona = registry.get("abelpersona").unwrap();
        assert_eq!(persona.policy, OwnershipPolicy::DirectUnlock);
        assert_eq!(persona.currency, Currency::WendyHearts);
        assert_eq!(persona.refund(4), 2);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = CategoryRegistry::builtin().unwrap();
        assert_eq!(registry.get("HABBO").unwrap().key.as_str(), "habbo");
    }

    #[test]
    fn test_category_not_found() {
        let registry = CategoryRegistry::builtin().unwrap();
        assert_eq!(
            registry.get("digimon").unwrap_err(),
            PullError::CategoryNotFound("digimon".into())
        );
    }

    #[test]
    fn test_rejects_zero_cost() {
        let result = CategoryRegistry::from_toml_str(
            r#"
            [categories.free]
            cost = 0
            currency = "temu_tokens"
            ownership = "instanced"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_tier_sum() {
        let result = CategoryRegistry::from_toml_str(
            r#"
            [categories.broken]
            cost = 3
            currency = "wendy_hearts"
            ownership = "direct_unlock"

            [[categories.broken.tiers]]
            name = "a"
            probability = 0.6

            [[categories.broken.tiers]]
            name = "b"
            probability = 0.3
            "#,
        );
        let ConfigError::Invalid(reason) = result.unwrap_err() else {
            panic!("expected an invalid-configuration error");
        };
        assert!(reason.starts_with("broken: tier probabilities sum to 0.8"), "{reason}");
        assert!(!reason.contains("invalid configuration"), "{reason}");
    }

    #[test]
    fn test_thirds_load_from_toml() {
        let registry = CategoryRegistry::from_toml_str(
            r#"
            [categories.even]
            cost = 3
            currency = "gatilla_gold"
            ownership = "instanced_dedup"

            [[categories.even.tiers]]
            name = "a"
            probability = 0.3333333333333333

            [[categories.even.tiers]]
            name = "b"
            probability = 0.3333333333333333

            [[categories.even.tiers]]
            name = "c"
            probability = 0.3333333333333333
            "#,
        )
        .unwrap();
        let table = registry.get("even").unwrap().selector.tier_table().unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.tiers().iter().map(|t| t.probability_ppm).sum::<u32>(), 1_000_000);
    }

    #[test]
    fn test_rejects_keys_differing_only_in_case() {
        let result = CategoryRegistry::from_toml_str(
            r#"
            [categories.Pokemon]
            cost = 5
            currency = "temu_tokens"
            ownership = "instanced"

            [categories.pokemon]
            cost = 5
            currency = "temu_tokens"
            ownership = "instanced"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_ownership() {
        let result = CategoryRegistry::from_toml_str(
            r#"
            [categories.odd]
            cost = 5
            currency = "temu_tokens"
            ownership = "borrowed"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
