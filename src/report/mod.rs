//! Embedding size report derived from fitted categorical statistics

use crate::error::{PipelineError, Result};
use crate::pipeline::FittedWorkflow;
use serde::{Deserialize, Serialize};

pub const MIN_EMBEDDING_WIDTH: usize = 16;
pub const MAX_EMBEDDING_WIDTH: usize = 512;

/// Cardinality and embedding width of one categorical column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSize {
    pub column: String,
    pub cardinality: u64,
    pub width: usize,
}

/// `clamp(round(1.6 * n^0.56), 16, 512)`
pub fn embedding_width(cardinality: u64) -> usize {
    let width = (1.6 * (cardinality as f64).powf(0.56)).round() as usize;
    width.clamp(MIN_EMBEDDING_WIDTH, MAX_EMBEDDING_WIDTH)
}

/// One entry per categorical column, in schema order
pub fn embedding_sizes(fitted: &FittedWorkflow) -> Result<Vec<EmbeddingSize>> {
    fitted
        .schema()
        .categorical()
        .iter()
        .map(|column| {
            let cardinality = fitted.cardinality(column).ok_or(PipelineError::NotFitted)?;
            Ok(EmbeddingSize {
                column: column.clone(),
                cardinality,
                width: embedding_width(cardinality),
            })
        })
        .collect()
}

/// Slot sizes (cardinalities) in schema order
pub fn slot_sizes(report: &[EmbeddingSize]) -> Vec<u64> {
    report.iter().map(|e| e.cardinality).collect()
}

/// Total embedding table rows across all columns
pub fn total_rows(report: &[EmbeddingSize]) -> u64 {
    report.iter().map(|e| e.cardinality).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_rule() {
        assert_eq!(embedding_width(1), 16);
        assert_eq!(embedding_width(1_000), 77);
        assert_eq!(embedding_width(10_000), 278);
        assert_eq!(embedding_width(10_000_000), 512);
    }

    #[test]
    fn test_width_monotone() {
        let widths: Vec<usize> = [2u64, 50, 500, 5_000, 50_000].iter().map(|n| embedding_width(*n)).collect();
        assert!(widths.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_slot_sizes() {
        let report = vec![
            EmbeddingSize { column: "C1".into(), cardinality: 10, width: 16 },
            EmbeddingSize { column: "C2".into(), cardinality: 5, width: 16 },
        ];
        assert_eq!(slot_sizes(&report), vec![10, 5]);
        assert_eq!(total_rows(&report), 15);
    }
}
