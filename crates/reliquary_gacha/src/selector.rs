//! # Selectors
//!
//! Picks one item out of a catalog. Selection is pure: given the same items
//! and the same RNG state, the same item comes out.
//!
//! - **Uniform**: every item has probability `1/N`.
//! - **Tiered**: roll a tier from the [`TierTable`], then pick uniformly
//!   inside that tier's pool. If the rolled pool is empty, fall back to the
//!   first non-empty tier in ascending order. This two-stage draw is what
//!   keeps a large legendary pool from diluting the legendary rate.

use rand::Rng;

use crate::catalog::{CatalogItem, Tier};
use crate::error::SelectError;
use crate::tier::TierTable;

/// Selection strategy of a category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    /// Flat pool.
    Uniform,
    /// Pool partitioned by tier.
    Tiered(TierTable),
}

impl Selector {
    /// Draws one item.
    ///
    /// # Errors
    ///
    /// `EmptyCatalog` / `NoItemsAvailable` when there is nothing to draw.
    pub fn select<'a, R: Rng + ?Sized>(
        &self,
        items: &'a [CatalogItem],
        rng: &mut R,
    ) -> Result<&'a CatalogItem, SelectError> {
        match self {
            Self::Uniform => select_uniform(items, rng),
            Self::Tiered(table) => select_tiered(items, table, rng),
        }
    }

    /// The tier table, for tiered selectors.
    #[must_use]
    pub const fn tier_table(&self) -> Option<&TierTable> {
        match self {
            Self::Uniform => None,
            Self::Tiered(table) => Some(table),
        }
    }
}

/// Picks one item with equal probability.
///
/// # Errors
///
/// `SelectError::EmptyCatalog` if `items` is empty.
pub fn select_uniform<'a, T, R: Rng + ?Sized>(items: &'a [T], rng: &mut R) -> Result<&'a T, SelectError> {
    if items.is_empty() {
        return Err(SelectError::EmptyCatalog);
    }
    Ok(&items[rng.gen_range(0..items.len())])
}

/// Groups items into one pool per tier. Items whose tier is outside the
/// table are left out.
#[must_use]
pub fn partition_by_tier(items: &[CatalogItem], tier_count: usize) -> Vec<Vec<&CatalogItem>> {
    let mut pools = vec![Vec::new(); tier_count];
    for item in items {
        if let Some(pool) = usize::from(item.tier)
            .checked_sub(1)
            .and_then(|index| pools.get_mut(index))
        {
            pool.push(item);
        }
    }
    pools
}

/// Index of the pool to draw from for a rolled tier.
///
/// The rolled pool if it has items, otherwise the first non-empty pool.
#[must_use]
pub fn resolve_pool<T>(pools: &[Vec<T>], rolled: Tier) -> Option<usize> {
    let rolled_index = usize::from(rolled).checked_sub(1)?;
    if pools.get(rolled_index).is_some_and(|pool| !pool.is_empty()) {
        return Some(rolled_index);
    }
    pools.iter().position(|pool| !pool.is_empty())
}

/// Two-stage draw: tier by probability, then item uniformly.
///
/// # Errors
///
/// `SelectError::NoItemsAvailable` if every tier pool is empty.
pub fn select_tiered<'a, R: Rng + ?Sized>(
    items: &'a [CatalogItem],
    table: &TierTable,
    rng: &mut R,
) -> Result<&'a CatalogItem, SelectError> {
    let pools = partition_by_tier(items, table.len());
    let rolled = table.draw_tier(rng);
    let index = resolve_pool(&pools, rolled).ok_or(SelectError::NoItemsAvailable)?;
    select_uniform(&pools[index], rng).map(|item| *item)
}
