//! Low-level file access: row counting, sliced reads and type coercion

use crate::error::{PipelineError, Result};
use crate::schema::ColumnDtype;
use polars::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

/// Non-empty data lines of a delimited text file held in one byte range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub bytes: Range<u64>,
    pub rows: usize,
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| *b == b'\n' || *b == b'\r')
}

/// Scan a delimited text file once and group its data lines into spans of
/// at most `rows_per_span` rows.
///
/// Blank lines are not rows and the header line (if any) belongs to no
/// span. Lines are handled as bytes, so invalid UTF-8 does not stop the scan.
pub fn plan_text_spans(path: &Path, has_header: bool, rows_per_span: usize) -> Result<Vec<TextSpan>> {
    let file = File::open(path).map_err(|_| PipelineError::MissingInput(path.to_path_buf()))?;
    let mut reader = BufReader::new(file);
    let rows_per_span = rows_per_span.max(1);
    let mut spans = Vec::new();
    let mut current: Option<TextSpan> = None;
    let mut header_pending = has_header;
    let mut line = Vec::new();
    let mut pos = 0u64;

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        let start = pos;
        pos += n as u64;
        if is_blank(&line) {
            continue;
        }
        if header_pending {
            header_pending = false;
            continue;
        }
        let span = current.get_or_insert(TextSpan { bytes: start..start, rows: 0 });
        span.bytes.end = pos;
        span.rows += 1;
        if span.rows == rows_per_span {
            spans.extend(current.take());
        }
    }
    spans.extend(current);
    Ok(spans)
}

/// Read one span of a delimited text file.
///
/// Only the span's bytes are read. Every column is read as a string and
/// named from `columns`; numeric coercion happens in [`coerce`].
pub fn read_text_span(path: &Path, separator: u8, span: &TextSpan, columns: &[String]) -> Result<DataFrame> {
    let mut file = File::open(path).map_err(|_| PipelineError::MissingInput(path.to_path_buf()))?;
    file.seek(SeekFrom::Start(span.bytes.start))?;
    let mut raw = Vec::new();
    file.take(span.bytes.end - span.bytes.start).read_to_end(&mut raw)?;

    let mut data = Vec::with_capacity(raw.len() + 1);
    for line in raw.split_inclusive(|b| *b == b'\n').filter(|l| !is_blank(l)) {
        data.extend_from_slice(line);
        if !line.ends_with(b"\n") {
            data.push(b'\n');
        }
    }

    let parse_opts = CsvParseOptions::default()
        .with_separator(separator)
        .with_quote_char(None)
        .with_encoding(CsvEncoding::LossyUtf8);
    let mut df = CsvReadOptions::default()
        .with_has_header(false)
        .with_infer_schema_length(Some(0))
        .with_parse_options(parse_opts)
        .into_reader_with_file_handle(Cursor::new(data))
        .finish()?;

    if df.height() != span.rows {
        return Err(PipelineError::DataError(format!(
            "{} bytes {}..{}: read {} rows, expected {}",
            path.display(),
            span.bytes.start,
            span.bytes.end,
            df.height(),
            span.rows
        )));
    }
    if df.width() != columns.len() {
        return Err(PipelineError::DataError(format!(
            "{} has {} columns, expected {}",
            path.display(),
            df.width(),
            columns.len()
        )));
    }
    df.set_column_names(columns.iter().map(|c| c.as_str()))?;
    Ok(df)
}

/// Row count from Parquet metadata, without reading column data
pub fn count_parquet_rows(path: &Path) -> Result<usize> {
    let file = File::open(path).map_err(|_| PipelineError::MissingInput(path.to_path_buf()))?;
    let mut reader = ParquetReader::new(file);
    Ok(reader.num_rows()?)
}

/// Read a row slice of a Parquet file
pub fn read_parquet_slice(path: &Path, offset: usize, rows: usize) -> Result<DataFrame> {
    let file = File::open(path).map_err(|_| PipelineError::MissingInput(path.to_path_buf()))?;
    Ok(ParquetReader::new(file)
        .with_slice(Some((offset, rows)))
        .finish()?)
}

/// Select `dtypes` columns in order and cast each to its declared type.
///
/// Casts are non-strict: values that do not parse become null.
pub fn coerce(df: &DataFrame, dtypes: &[(String, ColumnDtype)]) -> Result<DataFrame> {
    let columns = dtypes
        .iter()
        .map(|(name, dtype)| {
            let column = df
                .column(name)
                .map_err(|_| PipelineError::ColumnNotFound(name.clone()))?;
            let casted = column.as_materialized_series().cast(&dtype.to_polars())?;
            Ok(casted.into_column())
        })
        .collect::<Result<Vec<Column>>>()?;
    Ok(DataFrame::new(columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tsv(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    fn names() -> Vec<String> {
        vec!["label".to_string(), "I1".to_string(), "C1".to_string()]
    }

    #[test]
    fn test_plan_text_spans() {
        let file = write_tsv(&["1\t2\ta", "0\t\tb", "1\t5\t"]);
        let spans = plan_text_spans(file.path(), false, 2).unwrap();
        let rows: Vec<usize> = spans.iter().map(|s| s.rows).collect();
        assert_eq!(rows, vec![2, 1]);
        assert_eq!(spans[0].bytes.start, 0);
        assert_eq!(spans[1].bytes.start, spans[0].bytes.end);

        let spans = plan_text_spans(file.path(), true, 10).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].rows, 2);
        assert_eq!(spans[0].bytes.start, 6);
    }

    #[test]
    fn test_read_text_span_and_coerce() {
        let file = write_tsv(&["1\t2\ta", "0\t\tb", "1\t5\tc"]);
        let spans = plan_text_spans(file.path(), false, 1).unwrap();
        let df = read_text_span(file.path(), b'\t', &spans[1], &names()).unwrap();
        assert_eq!(df.height(), 1);

        let dtypes = vec![
            ("label".to_string(), ColumnDtype::Int64),
            ("I1".to_string(), ColumnDtype::Float64),
            ("C1".to_string(), ColumnDtype::String),
        ];
        let typed = coerce(&df, &dtypes).unwrap();
        let i1 = typed.column("I1").unwrap().f64().unwrap();
        assert_eq!(i1.get(0), None);
        let c1 = typed.column("C1").unwrap().str().unwrap();
        assert_eq!(c1.get(0), Some("b"));
    }

    #[test]
    fn test_blank_lines_do_not_shift_spans() {
        let file = write_tsv(&["0\t1\ta", "", "1\t2\tb", "2\t3\tc", "", "", "3\t4\td", "4\t5\te", "5\t6\tf"]);
        let spans = plan_text_spans(file.path(), false, 2).unwrap();
        assert_eq!(spans.iter().map(|s| s.rows).sum::<usize>(), 6);

        let mut labels = Vec::new();
        for span in &spans {
            let df = read_text_span(file.path(), b'\t', span, &names()).unwrap();
            let col = df.column("label").unwrap().str().unwrap();
            labels.extend(col.into_no_null_iter().map(|v| v.to_string()));
        }
        assert_eq!(labels, vec!["0", "1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_invalid_utf8_is_counted() {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        file.write_all(b"0\t1\ta\n1\t2\t\xff\xfe\n2\t3\tc").unwrap();
        let spans = plan_text_spans(file.path(), false, 100).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].rows, 3);
        let df = read_text_span(file.path(), b'\t', &spans[0], &names()).unwrap();
        assert_eq!(df.height(), 3);
    }

    #[test]
    fn test_coerce_missing_column() {
        let df = df!("a" => &[1i64, 2]).unwrap();
        let dtypes = vec![("b".to_string(), ColumnDtype::Float32)];
        assert!(matches!(coerce(&df, &dtypes), Err(PipelineError::ColumnNotFound(_))));
    }

    #[test]
    fn test_parquet_slice_roundtrip() {
        let mut df = df!("x" => &[1i64, 2, 3, 4, 5]).unwrap();
        let file = tempfile::Builder::new().suffix(".parquet").tempfile().unwrap();
        ParquetWriter::new(File::create(file.path()).unwrap())
            .finish(&mut df)
            .unwrap();

        assert_eq!(count_parquet_rows(file.path()).unwrap(), 5);
        let slice = read_parquet_slice(file.path(), 3, 10).unwrap();
        let x = slice.column("x").unwrap().i64().unwrap();
        assert_eq!(x.into_iter().collect::<Vec<_>>(), vec![Some(4), Some(5)]);
    }
}
