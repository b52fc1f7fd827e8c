// Durable record - the pattern as it survives restarts

use crate::pattern::{Pattern, PatternError, StepValue, Tempo, TimeSignature};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Persistence error types
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to write durable record {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read durable record {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt durable record {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted form of the pattern: `{"steps": [...], "tempo_bpm": n}`
///
/// The signature is not stored; it follows from the number of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub steps: Vec<StepValue>,
    pub tempo_bpm: Tempo,
}

impl DurableRecord {
    pub fn to_pattern(&self) -> Result<Pattern, PatternError> {
        Pattern::from_steps(self.steps.clone(), self.tempo_bpm)
    }
}

impl Default for DurableRecord {
    /// Sixteen silent steps at the default tempo
    fn default() -> Self {
        Self {
            steps: vec![StepValue::Silent; TimeSignature::FourFour.step_count()],
            tempo_bpm: Tempo::default(),
        }
    }
}

impl From<&Pattern> for DurableRecord {
    fn from(pattern: &Pattern) -> Self {
        Self {
            steps: pattern.steps().to_vec(),
            tempo_bpm: pattern.tempo(),
        }
    }
}

/// JSON file holding one [`DurableRecord`]
#[derive(Debug, Clone)]
pub struct DurableStore {
    path: PathBuf,
}

impl DurableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record, or the default one if the file does not exist yet
    pub fn load_durable(&self) -> Result<DurableRecord, PersistenceError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no durable record, starting silent");
                return Ok(DurableRecord::default());
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&text).map_err(|source| PersistenceError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the record on disk
    ///
    /// Writes a sibling temp file and renames it over the record, so a crash
    /// mid-write leaves the previous record intact. Saving the same record
    /// twice is harmless.
    pub fn save_durable(&self, record: &DurableRecord) -> Result<(), PersistenceError> {
        let write_err = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let json = serde_json::to_string_pretty(record).map_err(|source| PersistenceError::Json {
            path: self.path.clone(),
            source,
        })?;

        let temp = self.temp_path();
        fs::write(&temp, json).map_err(write_err)?;
        fs::rename(&temp, &self.path).map_err(write_err)?;

        tracing::debug!(path = %self.path.display(), tempo = %record.tempo_bpm, "durable record saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
