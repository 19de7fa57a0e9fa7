//! Result sink
//!
//! Persists result records as a directory of JSON-lines part files with a
//! `_SUCCESS` marker. Overwrites are staged in a hidden sibling directory and
//! swapped in only after every part file has been written.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use swefix_common::{ResultRecord, Result, SwefixError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Marker written once a destination is complete
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// What to do when the destination already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace any previous content
    Overwrite,
    /// Refuse to touch an existing destination
    ErrorIfExists,
}

/// Outcome of a successful write
#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub destination: PathBuf,
    pub records: usize,
    pub files: Vec<PathBuf>,
}

/// Durable store for result records
pub trait ResultSink: Send + Sync {
    fn write(&self, records: &[ResultRecord], destination: &Path, mode: WriteMode) -> Result<WriteSummary>;
}

/// Directory of `part-NNNNN.jsonl` files
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    rows_per_file: usize,
}

impl JsonLinesSink {
    pub fn new(rows_per_file: usize) -> Self {
        Self {
            rows_per_file: rows_per_file.max(1),
        }
    }

    fn write_staged(&self, records: &[ResultRecord], destination: &Path, mode: WriteMode) -> Result<WriteSummary> {
        let name = destination
            .file_name()
            .ok_or_else(|| SwefixError::invalid_input("destination has no final path component"))?
            .to_string_lossy()
            .into_owned();
        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        if mode == WriteMode::ErrorIfExists && destination.exists() {
            return Err(SwefixError::invalid_input("destination already exists"));
        }

        fs::create_dir_all(&parent)?;
        let staging = parent.join(format!(".{}.staging-{}", name, Uuid::new_v4()));
        fs::create_dir(&staging)?;
        debug!("Staging results in {}", staging.display());

        let files = match self.write_parts(records, &staging) {
            Ok(files) => files,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!("Failed to remove staging directory {}: {}", staging.display(), cleanup);
                }
                return Err(e);
            }
        };

        promote_staging(&staging, destination)?;

        let files = files
            .into_iter()
            .map(|file| destination.join(file))
            .collect();

        Ok(WriteSummary {
            destination: destination.to_path_buf(),
            records: records.len(),
            files,
        })
    }

    /// Write part files and the marker, returning part file names
    fn write_parts(&self, records: &[ResultRecord], dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for (index, chunk) in records.chunks(self.rows_per_file).enumerate() {
            let name = format!("part-{:05}.jsonl", index);
            let mut writer = BufWriter::new(File::create(dir.join(&name))?);
            for record in chunk {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            names.push(name);
        }
        File::create(dir.join(SUCCESS_MARKER))?;
        Ok(names)
    }
}

/// Replace `destination` with the fully written staging directory
///
/// On failure the staging directory is left in place and named in the error.
fn promote_staging(staging: &Path, destination: &Path) -> Result<()> {
    let swap = || -> std::io::Result<()> {
        if destination.is_dir() {
            fs::remove_dir_all(destination)?;
        } else if destination.exists() {
            fs::remove_file(destination)?;
        }
        fs::rename(staging, destination)
    };

    swap().map_err(|e| {
        SwefixError::storage(
            destination,
            format!("{}; written results kept in {}", e, staging.display()),
        )
    })
}

impl ResultSink for JsonLinesSink {
    fn write(&self, records: &[ResultRecord], destination: &Path, mode: WriteMode) -> Result<WriteSummary> {
        let summary = self
            .write_staged(records, destination, mode)
            .map_err(|e| match e {
                SwefixError::Storage { .. } => e,
                other => SwefixError::storage(destination, other),
            })?;

        info!(
            "Wrote {} records in {} file(s) to {}",
            summary.records,
            summary.files.len(),
            summary.destination.display()
        );
        Ok(summary)
    }
}

/// Read every record back from a completed destination, in part order
pub fn read_results(destination: &Path) -> Result<Vec<ResultRecord>> {
    if !destination.join(SUCCESS_MARKER).is_file() {
        return Err(SwefixError::storage(destination, "missing _SUCCESS marker"));
    }

    let mut parts: Vec<PathBuf> = fs::read_dir(destination)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("part-") && n.ends_with(".jsonl"))
        })
        .collect();
    parts.sort();

    let mut records = Vec::new();
    for part in parts {
        for line in BufReader::new(File::open(&part)?).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                records.push(serde_json::from_str(&line)?);
            }
        }
    }
    Ok(records)
}
