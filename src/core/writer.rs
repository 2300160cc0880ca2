//! Append-only session files.
//!
//! Each (detector, session owner) pair maps to exactly one file, so a process
//! restart resumes appending to the same file. Files are never rewritten.

use crate::core::record::Record;
use crate::detector::types::DetectorType;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Errors raised while persisting a batch.
#[derive(Debug)]
pub enum PersistError {
    Io { path: PathBuf, source: io::Error },
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::Io { path, source } => {
                write!(f, "I/O error on {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistError::Io { source, .. } => Some(source),
        }
    }
}

/// The persisted file for one detector in one session.
///
/// Appends are serialised through an internal lock, so a threshold flush and
/// an explicit stop racing on the same detector never interleave lines.
#[derive(Debug)]
pub struct SessionFile {
    detector: DetectorType,
    path: PathBuf,
    lock: Mutex<()>,
}

impl SessionFile {
    pub fn new(dir: &Path, detector: DetectorType, owner_id: &str) -> Self {
        Self {
            detector,
            path: dir.join(Self::file_name(detector, owner_id)),
            lock: Mutex::new(()),
        }
    }

    /// Deterministic file name for a detector and session owner.
    pub fn file_name(detector: DetectorType, owner_id: &str) -> String {
        let owner: String = owner_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let owner = if owner.is_empty() { "anonymous".to_string() } else { owner };
        format!("{}_{}.log", detector.name(), owner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn detector(&self) -> DetectorType {
        self.detector
    }

    /// Append a batch, one record per line. Returns the number of records written.
    ///
    /// The batch is written with a single `write_all` and synced before
    /// returning. If a previous crash left a torn last line, it is terminated
    /// first so the new records start on their own lines.
    pub fn append(&self, records: &[Record]) -> Result<usize, PersistError> {
        if records.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut payload = String::new();
        for record in records {
            payload.push_str(&record.to_line());
            payload.push('\n');
        }

        self.write_payload(&payload).map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(records.len())
    }

    fn write_payload(&self, payload: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)?;

        if ends_with_torn_line(&mut file)? {
            file.write_all(b"\n")?;
        }
        file.write_all(payload.as_bytes())?;
        file.sync_data()
    }

    /// Read back every record in the file, in arrival order.
    pub fn read_records(&self) -> Result<Vec<Record>, PersistError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(content
            .lines()
            .filter(|line| !line.is_empty())
            .map(Record::parse_line)
            .collect())
    }

    /// Number of complete lines currently on disk.
    pub fn line_count(&self) -> Result<usize, PersistError> {
        self.read_records().map(|r| r.len())
    }
}

fn ends_with_torn_line(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
