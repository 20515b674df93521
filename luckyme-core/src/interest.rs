//! Weighted interest generation.
//!
//! The binomial profile approximates a normal distribution centered on the
//! caller's `luck`, wrapped around the attribute pool:
//!
//! ```text
//! n = count - 1, p = 0.5, u = floor(n * p)
//! id_i     = (luck + i - u + pool) mod pool
//! weight_i = round(100 * C(n, i) * p^i * (1 - p)^(n - i))
//! ```
//!
//! Weights therefore sum to roughly 100. They are evaluated in log space so
//! large counts neither overflow nor lose the profile.

use serde::{Deserialize, Serialize};

use crate::types::Attribute;

/// Attribute name used for every interest and data-object tag.
pub const APP_ATTRIBUTE: &str = "LuckyMe";

/// Ordered, weighted set of interests registered for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestProfile {
    pub interests: Vec<Attribute>,
}

impl InterestProfile {
    pub fn is_empty(&self) -> bool {
        self.interests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interests.len()
    }

    pub fn total_weight(&self) -> u64 {
        self.interests.iter().map(|attr| attr.weight).sum()
    }

    /// Interest ids in profile order; values that are not numbers are skipped.
    pub fn ids(&self) -> Vec<u64> {
        self.interests
            .iter()
            .filter_map(|attr| attr.value.parse().ok())
            .collect()
    }

    pub fn weights(&self) -> Vec<u64> {
        self.interests.iter().map(|attr| attr.weight).collect()
    }

    pub fn into_attributes(self) -> Vec<Attribute> {
        self.interests
    }
}

/// Binomial interest profile of `count` entries centered on `luck`.
///
/// Entries whose rounded weight is zero are left out. An empty pool yields an
/// empty profile.
pub fn generate(luck: u64, pool_size: u64, count: usize) -> InterestProfile {
    if count == 0 || pool_size == 0 {
        return InterestProfile::default();
    }

    let n = count - 1;
    let p = 0.5_f64;
    let u = (n as f64 * p).floor() as i128;
    let pool = i128::from(pool_size);

    let (ln_p, ln_q) = (p.ln(), (1.0 - p).ln());
    // ln C(n, i), advanced one term per entry.
    let mut ln_c = 0.0_f64;
    let mut interests = Vec::new();
    for i in 0..count {
        let ln_pmf = ln_c + i as f64 * ln_p + (n - i) as f64 * ln_q;
        let weight = (100.0 * ln_pmf.exp()).round() as u64;
        if weight > 0 {
            let id = (i128::from(luck) + i as i128 - u + pool).rem_euclid(pool);
            interests.push(Attribute::weighted(APP_ATTRIBUTE, id.to_string(), weight));
        }
        if i < n {
            ln_c += ((n - i) as f64).ln() - ((i + 1) as f64).ln();
        }
    }

    InterestProfile { interests }
}

/// Number of profile entries for an interest variance: `floor(4 * sqrt(v)) + 1`.
pub fn count_for_variance(variance: u64) -> usize {
    (4.0 * (variance as f64).sqrt()).floor() as usize + 1
}

/// The two weight-1 interests of `node` in a `grid_size` x `grid_size` grid:
/// its row and its column offset by `grid_size`.
pub fn grid(node: u64, grid_size: u64) -> InterestProfile {
    if grid_size == 0 {
        return InterestProfile::default();
    }
    let row = node / grid_size;
    let column = node % grid_size + grid_size;
    InterestProfile {
        interests: vec![
            Attribute::new(APP_ATTRIBUTE, row.to_string()),
            Attribute::new(APP_ATTRIBUTE, column.to_string()),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_four_weights() {
        assert_eq!(generate(2, 100, 5).weights(), vec![6, 25, 38, 25, 6]);
    }

    #[test]
    fn grid_interests_are_row_and_offset_column() {
        let profile = grid(7, 3);
        assert_eq!(profile.ids(), vec![2, 4]);
        assert_eq!(profile.weights(), vec![1, 1]);
    }
}
