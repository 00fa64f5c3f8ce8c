// src/capture.rs - captured time series and the {config, data} artifact

use crate::config::TestConfig;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One sampler observation. Field names follow the on-disk artifact format:
/// the commanded instantaneous frequency is serialized as `freq`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub time_since_start: f64,
    pub position: f64,
    pub commanded_position: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torque: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "freq")]
    pub commanded_frequency: Option<f64>,
}

/// Append-only during capture; read-only once the sampler task has been
/// joined. `time_since_start` is strictly increasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapturedSeries {
    records: Vec<SampleRecord>,
}

impl CapturedSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: SampleRecord) {
        debug_assert!(
            self.records
                .last()
                .is_none_or(|prev| record.time_since_start > prev.time_since_start),
            "samples must be strictly ordered in time"
        );
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SampleRecord> {
        self.records.iter()
    }

    /// Span between the first and last sample, in seconds.
    pub fn duration(&self) -> f64 {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => last.time_since_start - first.time_since_start,
            _ => 0.0,
        }
    }

    pub fn has_frequency_data(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.commanded_frequency.is_some())
    }

    /// Mean achieved rate over the capture, for spectral analysis of a
    /// jittery series.
    pub fn effective_sample_rate(&self) -> Option<f64> {
        let span = self.duration();
        if self.records.len() < 2 || span <= 0.0 {
            return None;
        }
        Some((self.records.len() - 1) as f64 / span)
    }

    pub fn positions(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.position).collect()
    }

    pub fn commanded_positions(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.commanded_position).collect()
    }
}

impl<'a> IntoIterator for &'a CapturedSeries {
    type Item = &'a SampleRecord;
    type IntoIter = std::slice::Iter<'a, SampleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// The persisted `{config, data}` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub config: TestConfig,
    pub data: CapturedSeries,
}

impl Artifact {
    pub fn new(config: TestConfig, data: CapturedSeries) -> Self {
        Self { config, data }
    }

    /// Writes `<out_dir>/<YYYYMMDD>/<mode>_<actuator>_<timestamp>.json` and
    /// returns the path.
    pub fn save(&self, out_dir: &Path) -> Result<PathBuf, ArtifactError> {
        let now = Local::now();
        let day_dir = out_dir.join(now.format("%Y%m%d").to_string());
        std::fs::create_dir_all(&day_dir)?;
        let name = format!(
            "{}_{}_{}.json",
            self.config.mode,
            self.config.actuator_id,
            now.format("%Y%m%d_%H%M%S")
        );
        let path = day_dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
