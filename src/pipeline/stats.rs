//! Mergeable partial statistics collected during the fit pass.
//!
//! Every worker accumulates partials over the partitions it reads; the
//! partials are then reduced with `merge`. Merging is associative and
//! commutative, so the result does not depend on scheduling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Running moments over the non-null values of a column (Welford, with
/// Chan's pairwise update for merging)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    pub count: u64,
    pub nulls: u64,
    pub mean: f64,
    m2: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Moments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: Option<f64>) {
        let Some(value) = value else {
            self.nulls += 1;
            return;
        };
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn merge(mut self, other: Moments) -> Moments {
        if other.count == 0 {
            self.nulls += other.nulls;
            return self;
        }
        if self.count == 0 {
            return Moments { nulls: self.nulls + other.nulls, ..other };
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * other.count as f64 / count as f64;
        let m2 = self.m2
            + other.m2
            + delta * delta * (self.count as f64 * other.count as f64) / count as f64;
        Moments {
            count,
            nulls: self.nulls + other.nulls,
            mean,
            m2,
            min: self.min.zip(other.min).map(|(a, b)| a.min(b)),
            max: self.max.zip(other.max).map(|(a, b)| a.max(b)),
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Per-value occurrence counts for one categorical column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrequencyTable {
    pub counts: HashMap<String, u64>,
    pub nulls: u64,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, value: Option<&str>) {
        match value {
            Some(v) => match self.counts.get_mut(v) {
                Some(count) => *count += 1,
                None => {
                    self.counts.insert(v.to_string(), 1);
                }
            },
            None => self.nulls += 1,
        }
    }

    /// Fold the smaller table into the larger one
    pub fn merge(self, other: FrequencyTable) -> FrequencyTable {
        let (mut big, small) = if self.counts.len() >= other.counts.len() {
            (self, other)
        } else {
            (other, self)
        };
        for (value, count) in small.counts {
            *big.counts.entry(value).or_insert(0) += count;
        }
        big.nulls += small.nulls;
        big
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum::<u64>() + self.nulls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moments_of(values: &[Option<f64>]) -> Moments {
        let mut m = Moments::new();
        for v in values {
            m.update(*v);
        }
        m
    }

    #[test]
    fn test_moments_basic() {
        let m = moments_of(&[Some(1.0), Some(2.0), None, Some(3.0), Some(4.0)]);
        assert_eq!(m.count, 4);
        assert_eq!(m.nulls, 1);
        assert!((m.mean - 2.5).abs() < 1e-12);
        assert!((m.variance() - 5.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.min, Some(1.0));
        assert_eq!(m.max, Some(4.0));
    }

    #[test]
    fn test_moments_merge_matches_single_pass() {
        let all = [Some(3.0), Some(-1.0), None, Some(8.5), Some(2.0), Some(0.0), None];
        let whole = moments_of(&all);
        let merged = moments_of(&all[..3]).merge(moments_of(&all[3..]));
        assert_eq!(merged.count, whole.count);
        assert_eq!(merged.nulls, whole.nulls);
        assert!((merged.mean - whole.mean).abs() < 1e-12);
        assert!((merged.variance() - whole.variance()).abs() < 1e-9);
        assert_eq!(merged.min, Some(-1.0));
        assert_eq!(merged.max, Some(8.5));
    }

    #[test]
    fn test_moments_merge_with_empty() {
        let m = moments_of(&[Some(1.0), Some(3.0)]);
        let empty = moments_of(&[None]);
        let left = empty.clone().merge(m.clone());
        let right = m.merge(empty);
        assert_eq!(left, right);
        assert_eq!(left.nulls, 1);
    }

    #[test]
    fn test_frequency_merge() {
        let mut a = FrequencyTable::new();
        for v in [Some("x"), Some("y"), None] {
            a.observe(v);
        }
        let mut b = FrequencyTable::new();
        for v in [Some("x"), Some("z")] {
            b.observe(v);
        }
        let merged = a.merge(b);
        assert_eq!(merged.counts["x"], 2);
        assert_eq!(merged.counts["y"], 1);
        assert_eq!(merged.counts["z"], 1);
        assert_eq!(merged.nulls, 1);
        assert_eq!(merged.total(), 5);
    }
}
