//! Output files of the apply pass: partition files, the file-list
//! manifest, and the `_metadata.json` descriptor

use crate::error::{PipelineError, Result};
use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "_file_list.txt";
pub const METADATA_FILE: &str = "_metadata.json";

pub fn part_file_name(index: usize) -> String {
    format!("part_{index:05}.parquet")
}

fn is_output_file(name: &str) -> bool {
    name == MANIFEST_FILE
        || name == METADATA_FILE
        || (name.starts_with("part_") && name.ends_with(".parquet"))
}

/// Create `dir` and remove outputs of any earlier run from it
pub fn prepare_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() && is_output_file(&entry.file_name().to_string_lossy()) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Ordered list of output partition files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub files: Vec<PathBuf>,
}

impl Manifest {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// Write the count line followed by one absolute path per line
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let mut body = format!("{}\n", self.files.len());
        for file in &self.files {
            let file = if file.is_absolute() {
                file.clone()
            } else {
                std::path::absolute(file)?
            };
            body.push_str(&file.to_string_lossy());
            body.push('\n');
        }
        let path = dir.join(MANIFEST_FILE);
        fs::write(&path, body)?;
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut lines = text.lines();
        let count: usize = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| PipelineError::DataError(format!("{}: missing file count", path.display())))?;
        let files: Vec<PathBuf> = lines.filter(|l| !l.is_empty()).map(PathBuf::from).collect();
        if files.len() != count {
            return Err(PipelineError::DataError(format!(
                "{}: declares {count} files but lists {}",
                path.display(),
                files.len()
            )));
        }
        Ok(Self { files })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub file_name: String,
    pub num_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub col_name: String,
    pub index: usize,
}

/// Parquet dataset descriptor read by the trainer's data layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub file_stats: Vec<FileStats>,
    pub labels: Vec<ColumnRef>,
    pub conts: Vec<ColumnRef>,
    pub cats: Vec<ColumnRef>,
}

impl OutputMetadata {
    /// Column indices follow the output column order
    pub fn new(schema: &Schema, file_stats: Vec<FileStats>) -> Self {
        let mut index = 0;
        let mut refs = |names: &[String]| -> Vec<ColumnRef> {
            names
                .iter()
                .map(|name| {
                    let r = ColumnRef { col_name: name.clone(), index };
                    index += 1;
                    r
                })
                .collect()
        };
        let labels = refs(schema.label());
        let conts = refs(schema.continuous());
        let cats = refs(schema.categorical());
        Self { file_stats, labels, conts, cats }
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(METADATA_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn total_rows(&self) -> usize {
        self.file_stats.iter().map(|f| f.num_rows).sum()
    }
}
