//! Weighted variant selection.
//!
//! Percentage rollouts must assign the same variant to the same subject in every process and every
//! client language, so the hash is fixed: MurmurHash3 x86 32-bit, seed 0, over
//! `"{config_key}{lookup_key}"`, normalized by `2^32 - 2`.
use std::io::Cursor;

use murmur3::murmur3_32;
use rand::{thread_rng, Rng};

/// Divisor that maps a 32-bit hash to `[0, 1)`.
const HASH_DIVISOR: f64 = 4_294_967_294.0;

/// Picks a variant index from a list of weights.
pub struct WeightedValueResolver<'a> {
    config_key: &'a str,
    weights: &'a [u32],
}

impl<'a> WeightedValueResolver<'a> {
    #[allow(missing_docs)]
    pub fn new(config_key: &'a str, weights: &'a [u32]) -> WeightedValueResolver<'a> {
        WeightedValueResolver {
            config_key,
            weights,
        }
    }

    /// Return the index of the selected variant, or `None` if there are no variants.
    ///
    /// With a `lookup_key` the result is stable. Without one, a uniformly random variant (by
    /// weight) is returned.
    pub fn resolve(&self, lookup_key: Option<&str>) -> Option<usize> {
        if self.weights.is_empty() {
            return None;
        }
        let fraction = match lookup_key {
            Some(lookup_key) => hash_fraction(self.config_key, lookup_key),
            None => thread_rng().gen::<f64>(),
        };
        Some(self.variant_index(fraction))
    }

    /// Map `fraction` (in `[0, 1)`) to a variant index.
    fn variant_index(&self, fraction: f64) -> usize {
        let total: u64 = self.weights.iter().map(|&w| u64::from(w)).sum();
        let bucket = total as f64 * fraction;

        let mut sum = 0.0;
        for (index, &weight) in self.weights.iter().enumerate() {
            if bucket < sum + f64::from(weight) {
                return index;
            }
            sum += f64::from(weight);
        }

        // Rounding at the upper end or all weights being zero.
        self.weights.len() - 1
    }
}

/// Stable position of `lookup_key` in `[0, 1)` for `config_key`.
pub fn hash_fraction(config_key: &str, lookup_key: &str) -> f64 {
    let input = format!("{config_key}{lookup_key}");
    // Reading from an in-memory cursor cannot fail.
    let hash = murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0);
    f64::from(hash) / HASH_DIVISOR
}
