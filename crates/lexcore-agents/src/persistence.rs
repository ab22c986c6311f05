//! Agent metrics persisted across restarts
//!
//! The file is a flat JSON object keyed by agent id. Writes go to a
//! temporary sibling first and are renamed into place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::AgentMetadata;

/// Errors reading or writing the metadata file
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure
    #[error("Metadata file error at {path}: {source}")]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid metadata JSON
    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ranking metrics of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedAgentMetrics {
    pub success_rate: f64,
    pub avg_processing_time: f64,
    pub error_count: u64,
    pub task_count: u64,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
}

impl From<&AgentMetadata> for PersistedAgentMetrics {
    fn from(metadata: &AgentMetadata) -> Self {
        Self {
            success_rate: metadata.success_rate,
            avg_processing_time: metadata.avg_processing_time,
            error_count: metadata.error_count,
            task_count: metadata.task_count,
            last_health_check: metadata.last_health_check,
        }
    }
}

impl PersistedAgentMetrics {
    /// Copy the metrics onto live metadata
    pub fn apply(&self, metadata: &mut AgentMetadata) {
        metadata.success_rate = self.success_rate.clamp(0.0, 1.0);
        metadata.avg_processing_time = self.avg_processing_time.max(0.0);
        metadata.error_count = self.error_count;
        metadata.task_count = self.task_count;
        metadata.last_health_check = self.last_health_check;
    }
}

/// Persisted metrics keyed by agent id
pub type PersistedMetadata = BTreeMap<String, PersistedAgentMetrics>;

/// Reads and writes the metadata file
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Load the file; a missing file is an empty map
    pub async fn load(&self) -> Result<PersistedMetadata, PersistenceError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted agent metadata");
                return Ok(PersistedMetadata::new());
            }
            Err(err) => return Err(self.io_error(err)),
        };
        Ok(serde_json::from_slice(&contents)?)
    }

    /// Replace the file with `metadata`
    pub async fn save(&self, metadata: &PersistedMetadata) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| self.io_error(err))?;
            }
        }

        let json = serde_json::to_vec_pretty(metadata)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|err| self.io_error(err))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| self.io_error(err))?;
        debug!(path = %self.path.display(), agents = metadata.len(), "Saved agent metadata");
        Ok(())
    }
}
