// Durable ledger backends
//
// A backend only knows how to read the whole ledger and durably replace it.
// Writes go to a sibling temporary file which is fsynced and renamed over
// the target, so a killed writer leaves the previously committed document.

use super::StorageError;
use crate::model::Ledger;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Global assignment wrapping the ledger in `data.js` files
pub const DATA_JS_PREFIX: &str = "window.BENCHMARK_DATA = ";

/// Persistence seam of the history store
pub trait LedgerBackend: Send + Sync {
    /// Read the full ledger; a missing document is an empty ledger
    fn load(&self) -> Result<Ledger, StorageError>;

    /// Durably replace the persisted ledger with `ledger`
    fn commit(&self, ledger: &Ledger) -> Result<(), StorageError>;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Non-durable backend for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryBackend;

impl LedgerBackend for MemoryBackend {
    fn load(&self) -> Result<Ledger, StorageError> {
        Ok(Ledger::default())
    }

    fn commit(&self, _ledger: &Ledger) -> Result<(), StorageError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// On-disk encoding of the ledger document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFormat {
    /// Plain JSON document
    Json,
    /// JSON assigned to `window.BENCHMARK_DATA` for static chart pages
    DataJs,
}

impl LedgerFormat {
    /// `.js` files use the `data.js` wrapper, everything else plain JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("js") => LedgerFormat::DataJs,
            _ => LedgerFormat::Json,
        }
    }

    pub fn encode(self, ledger: &Ledger) -> Result<String, StorageError> {
        let json = serde_json::to_string_pretty(ledger)?;
        Ok(match self {
            LedgerFormat::Json => format!("{json}\n"),
            LedgerFormat::DataJs => format!("{DATA_JS_PREFIX}{json}\n"),
        })
    }

    pub fn decode(self, text: &str) -> Result<Ledger, String> {
        let body = match self {
            LedgerFormat::Json => text.trim(),
            LedgerFormat::DataJs => strip_data_js(text)?,
        };
        if body.is_empty() {
            return Ok(Ledger::default());
        }
        serde_json::from_str(body).map_err(|e| e.to_string())
    }
}

fn strip_data_js(text: &str) -> Result<&str, String> {
    let trimmed = text.trim();
    let assignment = DATA_JS_PREFIX.trim_end().trim_end_matches('=').trim_end();
    let rest = trimmed
        .strip_prefix(assignment)
        .and_then(|rest| rest.trim_start().strip_prefix('='))
        .ok_or_else(|| format!("expected '{}' assignment", DATA_JS_PREFIX.trim_end()))?;
    Ok(rest.trim().trim_end_matches(';').trim_end())
}

/// Single-document file backend with whole-document atomic replace
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    format: LedgerFormat,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = LedgerFormat::from_path(&path);
        Self { path, format }
    }

    pub fn with_format(mut self, format: LedgerFormat) -> Self {
        self.format = format;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> LedgerFormat {
        self.format
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write `contents` to `temp_path`, flush it to disk, rename over the ledger
    fn replace_with(&self, temp_path: &Path, contents: &[u8]) -> Result<(), StorageError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(temp_path)
            .map_err(|e| self.io_error(temp_path, e))?;
        file.write_all(contents)
            .map_err(|e| self.io_error(temp_path, e))?;
        file.sync_all().map_err(|e| self.io_error(temp_path, e))?;
        drop(file);

        fs::rename(temp_path, &self.path).map_err(|e| self.io_error(&self.path, e))
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl LedgerBackend for FileBackend {
    fn load(&self) -> Result<Ledger, StorageError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "ledger not found, starting empty");
            return Ok(Ledger::default());
        }

        let text = fs::read_to_string(&self.path).map_err(|e| self.io_error(&self.path, e))?;
        self.format
            .decode(&text)
            .map_err(|reason| StorageError::Corrupt {
                path: self.path.clone(),
                reason,
            })
    }

    fn commit(&self, ledger: &Ledger) -> Result<(), StorageError> {
        let contents = self.format.encode(ledger)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(parent, e))?;
        }

        let temp_path = self.temp_path();
        if let Err(error) = self.replace_with(&temp_path, contents.as_bytes()) {
            // The commit error is what gets reported
            let _ = fs::remove_file(&temp_path);
            return Err(error);
        }

        debug!(
            path = %self.path.display(),
            bytes = contents.len(),
            "ledger committed"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
