//! The per-invocation results artifact.
//!
//! After a function process exits, successfully or not, a [`FunctionResultList`]
//! is written to `<results-dir>/results.yaml`. It carries the exit code, the
//! captured stderr, any structured `results` the function reported, and
//! SHA-256 digests of the exchanged streams so a run can be compared against
//! a later one without keeping the streams themselves.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{FnError, FnResult};

/// File name of the artifact inside the results directory.
pub const RESULTS_FILE_NAME: &str = "results.yaml";

/// API version stamped on the artifact.
pub const RESULTS_API_VERSION: &str = "apptest.dev/v1";

/// Kind stamped on the artifact.
pub const RESULTS_KIND: &str = "FunctionResultList";

/// Top-level results document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResultList {
    pub api_version: String,
    pub kind: String,
    pub metadata: ResultsMetadata,
    pub exit_code: i32,
    pub items: Vec<FunctionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsMetadata {
    pub name: String,
    pub run_id: Uuid,
}

/// Outcome of one function process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResult {
    /// Image reference or `exec:` path.
    pub function: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    /// Entries from the `results` field of the returned resource list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_digest: String,
    pub output_digest: String,
}

impl FunctionResultList {
    /// Wrap a single function result under a fresh run id.
    pub fn single(result: FunctionResult) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            api_version: RESULTS_API_VERSION.to_string(),
            kind: RESULTS_KIND.to_string(),
            metadata: ResultsMetadata {
                name: format!("fn-render-{run_id}"),
                run_id,
            },
            exit_code: result.exit_code,
            items: vec![result],
        }
    }
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Create `dir` (and its parents) if needed.
pub fn ensure_results_dir(dir: &Path) -> FnResult<()> {
    std::fs::create_dir_all(dir).map_err(|source| FnError::ResultsDirUnavailable {
        path: dir.to_path_buf(),
        source,
    })
}

/// Write `results` to `<dir>/results.yaml`, replacing any previous artifact.
///
/// The file is written to a temporary sibling and renamed into place, so a
/// reader never sees a partial document.
pub fn write_results(dir: &Path, results: &FunctionResultList) -> FnResult<PathBuf> {
    ensure_results_dir(dir)?;
    let target = dir.join(RESULTS_FILE_NAME);
    let yaml = serde_yaml::to_string(results).map_err(|e| FnError::Results(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(yaml.as_bytes())?;
    tmp.flush()?;
    tmp.persist(&target)
        .map_err(|e| FnError::Results(format!("{}: {}", target.display(), e.error)))?;

    tracing::debug!(path = %target.display(), "wrote function results");
    Ok(target)
}

/// Read an artifact written by [`write_results`].
pub fn read_results(path: &Path) -> FnResult<FunctionResultList> {
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|e| FnError::Results(e.to_string()))
}
