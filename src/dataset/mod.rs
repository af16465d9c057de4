//! Lazy, partitioned dataset readers
//!
//! A [`Dataset`] is a list of source files plus a target partition size
//! and a per-column type map. Nothing is read when it is created:
//! [`Dataset::partitions`] plans row slices from file metadata, and each
//! slice is read and coerced on demand by [`Dataset::read_partition`].
//! Planning is deterministic, so a dataset can be enumerated any number
//! of times with identical results.

pub mod convert;
mod reader;

pub use reader::coerce;

use crate::error::{PipelineError, Result};
use crate::schema::ColumnDtype;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default target partition size in bytes
pub const DEFAULT_PART_SIZE: usize = 128 * 1024 * 1024;

/// Estimated in-memory bytes for one string cell (value plus offset)
const STRING_CELL_BYTES: usize = 24;

/// On-disk format of the source files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    Parquet,
    /// Tab-separated, headerless (raw Criteo)
    Tsv,
    /// Comma-separated with a header row
    Csv,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.to_lowercase().as_str() {
            "parquet" | "pq" => Ok(FileFormat::Parquet),
            "tsv" | "txt" | "" => Ok(FileFormat::Tsv),
            "csv" => Ok(FileFormat::Csv),
            other => Err(PipelineError::ConfigError(format!("unsupported file format: {other}"))),
        }
    }

    fn text_options(self) -> Option<(u8, bool)> {
        match self {
            FileFormat::Parquet => None,
            FileFormat::Tsv => Some((b'\t', false)),
            FileFormat::Csv => Some((b',', true)),
        }
    }
}

/// A contiguous row slice of one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub file: PathBuf,
    /// Row offset of the slice within its file
    pub offset: usize,
    pub rows: usize,
    /// Byte range of the slice, for text files
    pub bytes: Option<Range<u64>>,
}

/// Read-only, re-enumerable view over a set of source files
#[derive(Debug, Clone)]
pub struct Dataset {
    files: Vec<PathBuf>,
    format: FileFormat,
    part_size: usize,
    dtypes: Vec<(String, ColumnDtype)>,
}

impl Dataset {
    /// Create a dataset. Text formats must list their columns in `dtypes` order.
    pub fn new(files: Vec<PathBuf>, format: FileFormat, dtypes: Vec<(String, ColumnDtype)>) -> Self {
        Self {
            files,
            format,
            part_size: DEFAULT_PART_SIZE,
            dtypes,
        }
    }

    pub fn with_part_size(mut self, bytes: usize) -> Self {
        self.part_size = bytes.max(1);
        self
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Estimated in-memory size of one coerced row
    pub fn row_bytes(&self) -> usize {
        self.dtypes
            .iter()
            .map(|(_, dtype)| match dtype {
                ColumnDtype::Float32 | ColumnDtype::Int32 => 4,
                ColumnDtype::Float64 | ColumnDtype::Int64 => 8,
                ColumnDtype::String => STRING_CELL_BYTES,
            })
            .sum::<usize>()
            .max(1)
    }

    pub fn rows_per_partition(&self) -> usize {
        (self.part_size / self.row_bytes()).max(1)
    }

    /// Plan the partitions of every file, in file order.
    ///
    /// Parquet files are sliced from their metadata row counts; text files
    /// are scanned once to find the byte range of every slice.
    pub fn partitions(&self) -> Result<Vec<Partition>> {
        let rows_per_part = self.rows_per_partition();
        let mut parts = Vec::new();
        for file in &self.files {
            let slices: Vec<(usize, Option<Range<u64>>)> = match self.format.text_options() {
                None => {
                    let total = reader::count_parquet_rows(file)?;
                    (0..total)
                        .step_by(rows_per_part)
                        .map(|offset| (rows_per_part.min(total - offset), None))
                        .collect()
                }
                Some((_, has_header)) => reader::plan_text_spans(file, has_header, rows_per_part)?
                    .into_iter()
                    .map(|span| (span.rows, Some(span.bytes)))
                    .collect(),
            };
            let mut offset = 0;
            for (rows, bytes) in slices {
                parts.push(Partition {
                    index: parts.len(),
                    file: file.clone(),
                    offset,
                    rows,
                    bytes,
                });
                offset += rows;
            }
        }
        debug!(
            files = self.files.len(),
            partitions = parts.len(),
            rows_per_part,
            "planned dataset partitions"
        );
        Ok(parts)
    }

    /// Read one partition and coerce it to the declared column types
    pub fn read_partition(&self, part: &Partition) -> Result<DataFrame> {
        let raw = match (self.format.text_options(), &part.bytes) {
            (None, _) => reader::read_parquet_slice(&part.file, part.offset, part.rows)?,
            (Some((separator, _)), Some(bytes)) => {
                let names: Vec<String> = self.dtypes.iter().map(|(n, _)| n.clone()).collect();
                let span = reader::TextSpan { bytes: bytes.clone(), rows: part.rows };
                reader::read_text_span(&part.file, separator, &span, &names)?
            }
            (Some(_), None) => {
                return Err(PipelineError::DataError(format!(
                    "partition {} of {} has no byte range",
                    part.index,
                    part.file.display()
                )))
            }
        };
        coerce(&raw, &self.dtypes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn write_parquet(path: &Path, n: i64) {
        let values: Vec<i64> = (0..n).collect();
        let mut df = df!("x" => &values).unwrap();
        ParquetWriter::new(File::create(path).unwrap()).finish(&mut df).unwrap();
    }

    #[test]
    fn test_partition_planning() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("day_0.parquet");
        let b = dir.path().join("day_1.parquet");
        write_parquet(&a, 10);
        write_parquet(&b, 3);

        let ds = Dataset::new(
            vec![a.clone(), b.clone()],
            FileFormat::Parquet,
            vec![("x".to_string(), ColumnDtype::Int64)],
        )
        .with_part_size(32); // 4 rows of 8 bytes

        let parts = ds.partitions().unwrap();
        let shape: Vec<(usize, usize)> = parts.iter().map(|p| (p.offset, p.rows)).collect();
        assert_eq!(shape, vec![(0, 4), (4, 4), (8, 2), (0, 3)]);
        assert_eq!(parts[3].file, b);
        assert_eq!(parts[3].index, 3);
        assert!(parts.iter().all(|p| p.bytes.is_none()));

        // re-enumerable
        assert_eq!(ds.partitions().unwrap(), parts);
    }

    #[test]
    fn test_read_partition_coerces() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("day_0.parquet");
        write_parquet(&a, 6);
        let ds = Dataset::new(
            vec![a],
            FileFormat::Parquet,
            vec![("x".to_string(), ColumnDtype::Float32)],
        )
        .with_part_size(12);

        let parts = ds.partitions().unwrap();
        assert_eq!(parts.len(), 2);
        let df = ds.read_partition(&parts[1]).unwrap();
        assert_eq!(df.column("x").unwrap().dtype(), &DataType::Float32);
        assert_eq!(df.height(), 3);
    }

    #[test]
    fn test_text_partitions_skip_blank_lines() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("day_0");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "0\ta\n\n1\tb\n2\tc\n\n3\td\n4\te\n5\tf").unwrap();

        let ds = Dataset::new(
            vec![path],
            FileFormat::Tsv,
            vec![
                ("label".to_string(), ColumnDtype::Int64),
                ("C1".to_string(), ColumnDtype::String),
            ],
        )
        .with_part_size(2 * 32); // 2 rows of 8 + 24 bytes

        let parts = ds.partitions().unwrap();
        let shape: Vec<(usize, usize)> = parts.iter().map(|p| (p.offset, p.rows)).collect();
        assert_eq!(shape, vec![(0, 2), (2, 2), (4, 2)]);

        let mut labels = Vec::new();
        for part in &parts {
            let df = ds.read_partition(part).unwrap();
            let col = df.column("label").unwrap().as_materialized_series().i64().unwrap().clone();
            labels.extend(col.into_no_null_iter());
        }
        assert_eq!(labels, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FileFormat::from_extension("parquet").unwrap(), FileFormat::Parquet);
        assert_eq!(FileFormat::from_extension("TSV").unwrap(), FileFormat::Tsv);
        assert!(FileFormat::from_extension("avro").is_err());
    }
}
