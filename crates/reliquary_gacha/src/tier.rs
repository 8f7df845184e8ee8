//! # Tier Tables
//!
//! Probabilities for drawing each tier of a catalog.
//!
//! Probabilities are stored as parts-per-million so boundary arithmetic is
//! exact: a table of `0.85 / 0.149 / 0.001` becomes the half-open ranges
//! `[0, 850_000)`, `[850_000, 999_000)`, `[999_000, 1_000_000)`. A roll is a
//! uniform integer in `[0, 1_000_000)`; a roll sitting exactly on a boundary
//! belongs to the upper tier.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::Tier;
use crate::error::{ConfigError, ConfigResult};

/// One million: the sum every tier table must reach.
pub const PPM_SCALE: u32 = 1_000_000;

/// How far the float total of a table may drift from 1.0 (one ppm).
const SUM_TOLERANCE: f64 = 1e-6;

fn check_probability(probability: f64) -> ConfigResult<f64> {
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        return Err(ConfigError::Invalid(format!(
            "tier probability {probability} is outside [0, 1]"
        )));
    }
    Ok(probability)
}

/// Rounds a cumulative probability to a ppm boundary.
fn to_boundary(cumulative: f64) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bound = (cumulative * f64::from(PPM_SCALE)).round().clamp(0.0, f64::from(PPM_SCALE)) as u32;
    bound
}

/// A named tier and its draw probability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Display label ("basic", "legendary", ...).
    pub name: String,
    /// Probability in parts-per-million.
    pub probability_ppm: u32,
}

/// Ordered tiers with cumulative boundaries. Tier numbers start at 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierTable {
    tiers: Vec<TierSpec>,
    /// Exclusive upper bound of each tier's roll range.
    bounds: Vec<u32>,
}

impl TierTable {
    /// Builds a table.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` if there are no tiers, more than 255 tiers, or
    /// the probabilities do not sum to exactly [`PPM_SCALE`].
    pub fn new(tiers: Vec<TierSpec>) -> ConfigResult<Self> {
        if tiers.is_empty() {
            return Err(ConfigError::Invalid("tier table has no tiers".into()));
        }
        if tiers.len() > usize::from(Tier::MAX) {
            return Err(ConfigError::Invalid(format!(
                "tier table has {} tiers, at most {} allowed",
                tiers.len(),
                Tier::MAX
            )));
        }

        let mut bounds = Vec::with_capacity(tiers.len());
        let mut cumulative = 0u32;
        for tier in &tiers {
            cumulative = cumulative
                .checked_add(tier.probability_ppm)
                .filter(|&c| c <= PPM_SCALE)
                .ok_or_else(|| ConfigError::Invalid("tier probabilities exceed 1.0".into()))?;
            bounds.push(cumulative);
        }
        if cumulative != PPM_SCALE {
            return Err(ConfigError::Invalid(format!(
                "tier probabilities sum to {cumulative} ppm, expected {PPM_SCALE}"
            )));
        }

        Ok(Self { tiers, bounds })
    }

    /// Builds a table from `(name, probability)` pairs.
    ///
    /// # Errors
    ///
    /// Same as [`TierTable::from_named_probabilities`].
    pub fn from_probabilities(tiers: &[(&str, f64)]) -> ConfigResult<Self> {
        Self::from_named_probabilities(
            tiers
                .iter()
                .map(|&(name, probability)| (name.to_string(), probability))
                .collect(),
        )
    }

    /// Builds a table from float probabilities.
    ///
    /// Boundaries come from rounding the running total, and the last one is
    /// pinned to [`PPM_SCALE`], so `1/3 + 1/3 + 1/3` becomes
    /// `333_333 / 333_334 / 333_333`.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` if a probability is outside `[0, 1]` or the
    /// total is not 1.0 within one ppm, otherwise as [`TierTable::new`].
    pub fn from_named_probabilities(tiers: Vec<(String, f64)>) -> ConfigResult<Self> {
        let total = tiers
            .iter()
            .try_fold(0.0, |sum, &(_, p)| check_probability(p).map(|p| sum + p))?;
        if (total - 1.0).abs() > SUM_TOLERANCE {
            return Err(ConfigError::Invalid(format!(
                "tier probabilities sum to {total}, expected 1.0"
            )));
        }

        let last = tiers.len().saturating_sub(1);
        let mut cumulative = 0.0;
        let mut previous = 0u32;
        let specs = tiers
            .into_iter()
            .enumerate()
            .map(|(index, (name, probability))| {
                cumulative += probability;
                let bound = if index == last {
                    PPM_SCALE
                } else {
                    to_boundary(cumulative).max(previous)
                };
                let spec = TierSpec {
                    name,
                    probability_ppm: bound - previous,
                };
                previous = bound;
                spec
            })
            .collect();
        Self::new(specs)
    }

    /// Number of tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always false; a table holds at least one tier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Tier definitions in order.
    #[must_use]
    pub fn tiers(&self) -> &[TierSpec] {
        &self.tiers
    }

    /// Label of a tier, if the table has it.
    #[must_use]
    pub fn name(&self, tier: Tier) -> Option<&str> {
        let index = usize::from(tier).checked_sub(1)?;
        self.tiers.get(index).map(|t| t.name.as_str())
    }

    /// Maps a roll in `[0, PPM_SCALE)` to a tier number.
    ///
    /// Rolls at or past `PPM_SCALE` resolve to the last tier.
    #[must_use]
    pub fn tier_for_roll(&self, roll: u32) -> Tier {
        let index = self
            .bounds
            .partition_point(|&bound| bound <= roll)
            .min(self.tiers.len() - 1);
        // Length is capped at Tier::MAX in `new`.
        #[allow(clippy::cast_possible_truncation)]
        let tier = (index + 1) as Tier;
        tier
    }

    /// Draws a tier.
    pub fn draw_tier<R: Rng + ?Sized>(&self, rng: &mut R) -> Tier {
        self.tier_for_roll(rng.gen_range(0..PPM_SCALE))
    }
}

/// Empirical tier counts.
#[derive(Clone, Debug, Default)]
pub struct TierHistogram {
    /// Number of draws.
    pub total: u64,
    /// Draws per tier; index 0 is tier 1.
    pub counts: Vec<u64>,
}

impl TierHistogram {
    /// Observed frequency of a tier in `[0, 1]`.
    #[must_use]
    pub fn frequency(&self, tier: Tier) -> f64 {
        let Some(index) = usize::from(tier).checked_sub(1) else {
            return 0.0;
        };
        if self.total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let freq = self.counts.get(index).copied().unwrap_or(0) as f64 / self.total as f64;
        freq
    }
}

/// Draws `iterations` tiers and counts them.
pub fn simulate_tiers<R: Rng + ?Sized>(table: &TierTable, rng: &mut R, iterations: u64) -> TierHistogram {
    let mut histogram = TierHistogram {
        total: iterations,
        counts: vec![0; table.len()],
    };
    for _ in 0..iterations {
        let tier = table.draw_tier(rng);
        histogram.counts[usize::from(tier) - 1] += 1;
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn three_tiers() -> TierTable {
        TierTable::from_probabilities(&[("basic", 0.85), ("evolved", 0.149), ("legendary", 0.001)])
            .unwrap()
    }

    #[test]
    fn test_probability_conversion() {
        let table = three_tiers();
        let ppm: Vec<u32> = table.tiers().iter().map(|t| t.probability_ppm).collect();
        assert_eq!(ppm, vec![850_000, 149_000, 1_000]);
        assert!(TierTable::from_probabilities(&[("a", -0.1), ("b", 1.1)]).is_err());
        assert!(TierTable::from_probabilities(&[("a", f64::NAN)]).is_err());
    }

    #[test]
    fn test_thirds_are_accepted() {
        let third = 1.0 / 3.0;
        let table =
            TierTable::from_probabilities(&[("a", third), ("b", third), ("c", third)]).unwrap();

        let ppm: Vec<u32> = table.tiers().iter().map(|t| t.probability_ppm).collect();
        assert_eq!(ppm, vec![333_333, 333_334, 333_333]);
        assert_eq!(ppm.iter().sum::<u32>(), PPM_SCALE);
        assert_eq!(table.tier_for_roll(333_332), 1);
        assert_eq!(table.tier_for_roll(333_333), 2);
        assert_eq!(table.tier_for_roll(666_667), 3);
    }

    #[test]
    fn test_sum_within_one_ppm_is_accepted() {
        let table = TierTable::from_probabilities(&[("a", 0.1), ("b", 0.2), ("c", 0.7)]).unwrap();
        assert_eq!(table.tiers()[2].probability_ppm, 700_000);
        assert!(TierTable::from_probabilities(&[("a", 0.5), ("b", 0.49999)]).is_err());
    }

    #[test]
    fn test_sum_must_be_one() {
        assert!(TierTable::from_probabilities(&[("a", 0.5), ("b", 0.4)]).is_err());
        assert!(TierTable::from_probabilities(&[("a", 0.7), ("b", 0.4)]).is_err());
        assert!(TierTable::new(vec![]).is_err());
    }

    #[test]
    fn test_boundaries_are_half_open() {
        let table = three_tiers();
        assert_eq!(table.tier_for_roll(0), 1);
        assert_eq!(table.tier_for_roll(849_999), 1);
        assert_eq!(table.tier_for_roll(850_000), 2);
        assert_eq!(table.tier_for_roll(998_999), 2);
        assert_eq!(table.tier_for_roll(999_000), 3);
        assert_eq!(table.tier_for_roll(999_999), 3);
        assert_eq!(table.tier_for_roll(PPM_SCALE), 3);
    }

    #[test]
    fn test_zero_probability_tier_is_never_rolled() {
        let table =
            TierTable::from_probabilities(&[("a", 0.5), ("never", 0.0), ("c", 0.5)]).unwrap();
        assert_eq!(table.tier_for_roll(499_999), 1);
        assert_eq!(table.tier_for_roll(500_000), 3);
    }

    #[test]
    fn test_names() {
        let table = three_tiers();
        assert_eq!(table.name(1), Some("basic"));
        assert_eq!(table.name(3), Some("legendary"));
        assert_eq!(table.name(0), None);
        assert_eq!(table.name(4), None);
    }

    #[test]
    fn test_histogram_counts_every_draw() {
        let table = three_tiers();
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let histogram = simulate_tiers(&table, &mut rng, 10_000);
        assert_eq!(histogram.counts.iter().sum::<u64>(), 10_000);
        assert!(histogram.frequency(1) > 0.8);
    }
}
