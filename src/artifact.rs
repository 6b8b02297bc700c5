//! Artifact identity, input selection and output naming

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{InstrumentError, Result};

/// Marker inserted before the extension of instrumented artifacts
pub const INSTRUMENTED_SUFFIX: &str = "-instrumented";

/// Extension of application archives picked from a directory
pub const ARCHIVE_EXTENSION: &str = "apk";

/// `calc.apk` -> `calc-instrumented.apk`
pub fn instrumented_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            format!("{}{}.{}", stem, INSTRUMENTED_SUFFIX, ext)
        }
        _ => format!("{}{}", file_name, INSTRUMENTED_SUFFIX),
    }
}

/// Whether `file_name` is an archive this tool already produced
pub fn is_instrumented(file_name: &str) -> bool {
    file_name.ends_with(&format!("{}.{}", INSTRUMENTED_SUFFIX, ARCHIVE_EXTENSION))
}

/// Resolve a CLI path to one archive
///
/// A directory yields its first `.apk` (in name order) that is not already
/// instrumented.
pub fn select_artifact(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }

    let entries = fs::read_dir(path)
        .map_err(|e| InstrumentError::io(format!("failed to list {}", path.display()), e))?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| {
                    n.ends_with(&format!(".{}", ARCHIVE_EXTENSION)) && !is_instrumented(n)
                })
        })
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        InstrumentError::Config(format!(
            "no uninstrumented .{} file in {}",
            ARCHIVE_EXTENSION,
            path.display()
        ))
    })
}

/// The application archive being processed
#[derive(Debug, Clone)]
pub struct Artifact {
    path: PathBuf,
    file_name: String,
}

impl Artifact {
    /// Wrap an existing archive file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(InstrumentError::Config(format!(
                "artifact {} is not a file",
                path.display()
            )));
        }
        let path = path.canonicalize().map_err(|e| {
            InstrumentError::io(format!("failed to resolve {}", path.display()), e)
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                InstrumentError::Config(format!("artifact {} has no file name", path.display()))
            })?;
        Ok(Self { path, file_name })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Name of the published, instrumented archive
    pub fn instrumented_file_name(&self) -> String {
        instrumented_name(&self.file_name)
    }

    pub fn modified(&self) -> Result<SystemTime> {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| {
                InstrumentError::io(format!("failed to stat {}", self.path.display()), e)
            })
    }

    /// Directory holding the archive; the default output location
    pub fn parent_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
