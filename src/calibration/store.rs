use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use super::{CalibrationCurve, CalibrationPoint, CurveError};

/// Smallest curve accepted from disk.
const MIN_STORED_POINTS: usize = 2;

#[derive(Error, Debug)]
pub enum CalibrationStoreError {
    #[error("calibration file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("calibration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot encode calibration curve: {0}")]
    Encode(#[from] serde_json::Error),
}

/// On-disk layout of `calibration.json`.
#[derive(Serialize, Deserialize)]
struct CalibrationFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    captured_at: Option<DateTime<Utc>>,
    points: Vec<CalibrationPoint>,
}

pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the curve, replacing any previous file in one rename.
    pub fn save(&self, curve: &CalibrationCurve) -> Result<(), CalibrationStoreError> {
        let file = CalibrationFile {
            captured_at: Some(Utc::now()),
            points: curve.points().to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let io_err = |source: io::Error| CalibrationStoreError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        info!(
            "Saved {} calibration points to {}",
            curve.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Load the stored curve. A missing file means the meter was never
    /// calibrated and yields `None`.
    pub fn load(&self) -> Result<Option<CalibrationCurve>, CalibrationStoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "No calibration file at {}, meter will run uncorrected",
                    self.path.display()
                );
                return Ok(None);
            }
            Err(source) => {
                return Err(CalibrationStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let file: CalibrationFile =
            serde_json::from_str(&text).map_err(|e| self.corrupt(e.to_string()))?;
        if file.points.len() < MIN_STORED_POINTS {
            return Err(self.corrupt(
                CurveError::TooFewPoints {
                    required: MIN_STORED_POINTS,
                    actual: file.points.len(),
                }
                .to_string(),
            ));
        }
        let curve = CalibrationCurve::new(file.points).map_err(|e| self.corrupt(e.to_string()))?;

        match file.captured_at {
            Some(at) => info!(
                "Loaded {} calibration points from {} (captured {})",
                curve.len(),
                self.path.display(),
                at.to_rfc3339()
            ),
            None => info!(
                "Loaded {} calibration points from {}",
                curve.len(),
                self.path.display()
            ),
        }
        Ok(Some(curve))
    }

    fn corrupt(&self, reason: String) -> CalibrationStoreError {
        CalibrationStoreError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}
