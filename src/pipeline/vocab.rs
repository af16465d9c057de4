//! Frequency-thresholded category vocabularies

use super::stats::FrequencyTable;
use std::collections::HashMap;

/// Index shared by nulls, rare values and values never seen in training
pub const RESERVED_INDEX: i64 = 0;

/// Ordered mapping from category value to dense index.
///
/// Frequent values take indices `1..=len()` by descending training count,
/// ties broken by value.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    values: Vec<String>,
    counts: Vec<u64>,
    rare_count: u64,
    null_count: u64,
    lookup: HashMap<String, i64>,
}

impl Vocabulary {
    /// Keep values seen at least `freq_threshold` times, then the `max_size`
    /// most frequent of those; everything else is coalesced into the
    /// reserved index.
    pub fn build(table: FrequencyTable, freq_threshold: u64, max_size: Option<usize>) -> Self {
        let mut entries: Vec<(String, u64)> = table.counts.into_iter().collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut keep = entries
            .iter()
            .take_while(|(_, count)| *count >= freq_threshold)
            .count();
        if let Some(max) = max_size {
            keep = keep.min(max);
        }

        let rare_count: u64 = entries[keep..].iter().map(|(_, c)| c).sum();
        entries.truncate(keep);
        let (values, counts) = entries.into_iter().unzip();
        Self::from_parts(values, counts, rare_count, table.nulls)
    }

    /// Rebuild from stored parts (values already in index order)
    pub fn from_parts(values: Vec<String>, counts: Vec<u64>, rare_count: u64, null_count: u64) -> Self {
        let lookup = values
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i as i64 + 1))
            .collect();
        Self { values, counts, rare_count, null_count, lookup }
    }

    pub fn index_of(&self, value: Option<&str>) -> i64 {
        value
            .and_then(|v| self.lookup.get(v).copied())
            .unwrap_or(RESERVED_INDEX)
    }

    /// Number of distinct indices, including the reserved one
    pub fn cardinality(&self) -> u64 {
        self.values.len() as u64 + 1
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Training occurrences that fell below the threshold or size cap
    pub fn rare_count(&self) -> u64 {
        self.rare_count
    }

    pub fn null_count(&self) -> u64 {
        self.null_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(values: &[(&str, u64)], nulls: u64) -> FrequencyTable {
        FrequencyTable {
            counts: values.iter().map(|(v, c)| (v.to_string(), *c)).collect(),
            nulls,
        }
    }

    #[test]
    fn test_threshold_and_order() {
        let vocab = Vocabulary::build(table(&[("a", 5), ("b", 9), ("c", 1), ("d", 5)], 2), 2, None);
        assert_eq!(vocab.values(), &["b".to_string(), "a".to_string(), "d".to_string()]);
        assert_eq!(vocab.index_of(Some("b")), 1);
        assert_eq!(vocab.index_of(Some("a")), 2);
        assert_eq!(vocab.index_of(Some("d")), 3);
        assert_eq!(vocab.index_of(Some("c")), RESERVED_INDEX);
        assert_eq!(vocab.index_of(None), RESERVED_INDEX);
        assert_eq!(vocab.index_of(Some("never-seen")), RESERVED_INDEX);
        assert_eq!(vocab.rare_count(), 1);
        assert_eq!(vocab.null_count(), 2);
        assert_eq!(vocab.cardinality(), 4);
    }

    #[test]
    fn test_max_size_cap() {
        let vocab = Vocabulary::build(table(&[("a", 5), ("b", 9), ("c", 3)], 0), 1, Some(1));
        assert_eq!(vocab.values(), &["b".to_string()]);
        assert_eq!(vocab.rare_count(), 8);
        assert_eq!(vocab.cardinality(), 2);
    }

    #[test]
    fn test_all_rare() {
        let vocab = Vocabulary::build(table(&[("a", 1), ("b", 1)], 0), 10, None);
        assert!(vocab.is_empty());
        assert_eq!(vocab.cardinality(), 1);
        assert_eq!(vocab.index_of(Some("a")), RESERVED_INDEX);
    }

    #[test]
    fn test_from_parts_roundtrip() {
        let vocab = Vocabulary::build(table(&[("x", 4), ("y", 2)], 1), 1, None);
        let rebuilt = Vocabulary::from_parts(
            vocab.values().to_vec(),
            vocab.counts().to_vec(),
            vocab.rare_count(),
            vocab.null_count(),
        );
        assert_eq!(rebuilt, vocab);
    }
}
