//! Evidence run store.
//!
//! Each validation/candidate/journey invocation records its artifacts
//! under a run directory named `YYYY-MM-DDTHH-mm-ssZ` (UTC, second
//! precision). Directory names sort lexicographically in chronological
//! order, which is what retention pruning relies on. Two runs within
//! the same second must be serialized by the caller or given distinct
//! explicit run ids.

use std::path::{Path, PathBuf};

use smol_str::SmolStr;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::WorkbenchError;

/// Directory under the layout root holding evidence runs.
pub const EVIDENCE_DIR: &str = "_evidence";

const RUN_ID_FORMAT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]Z");

/// Evidence store rooted at one layout directory.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    #[must_use]
    pub fn new(layout_root: &Path) -> Self {
        Self {
            root: layout_root.join(EVIDENCE_DIR),
        }
    }

    /// Run id for the current UTC time.
    #[must_use]
    pub fn new_run_id() -> String {
        OffsetDateTime::now_utc()
            .format(RUN_ID_FORMAT)
            .unwrap_or_else(|_| "1970-01-01T00-00-00Z".to_string())
    }

    #[must_use]
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Writes one JSON artifact, creating the run directory on first use.
    pub fn write_artifact(
        &self,
        run_id: &str,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<PathBuf, WorkbenchError> {
        let dir = self.run_dir(run_id);
        std::fs::create_dir_all(&dir).map_err(|err| WorkbenchError::io(&dir, err))?;
        let path = dir.join(name);
        let text = serde_json::to_string_pretty(value)
            .map_err(|err| WorkbenchError::Evidence(SmolStr::new(err.to_string())))?;
        std::fs::write(&path, format!("{text}\n")).map_err(|err| WorkbenchError::io(&path, err))?;
        debug!(run_id, artifact = name, "evidence artifact written");
        Ok(path)
    }

    /// Writes one SVG under the run's `screenshots/` folder.
    pub fn write_screenshot(
        &self,
        run_id: &str,
        viewport: &str,
        svg: &str,
    ) -> Result<PathBuf, WorkbenchError> {
        let dir = self.run_dir(run_id).join("screenshots");
        std::fs::create_dir_all(&dir).map_err(|err| WorkbenchError::io(&dir, err))?;
        let path = dir.join(format!("{viewport}-overview.svg"));
        std::fs::write(&path, svg).map_err(|err| WorkbenchError::io(&path, err))?;
        Ok(path)
    }

    /// Existing run ids in lexicographic (= chronological) order.
    pub fn run_ids(&self) -> Result<Vec<String>, WorkbenchError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let entries =
            std::fs::read_dir(&self.root).map_err(|err| WorkbenchError::io(&self.root, err))?;
        for entry in entries {
            let entry = entry.map_err(|err| WorkbenchError::io(&self.root, err))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_run_id(&name) {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Deletes the oldest runs beyond `retain` (clamped to at least 1).
    /// Returns the removed run ids, oldest first.
    pub fn prune(&self, retain: usize) -> Result<Vec<String>, WorkbenchError> {
        let retain = retain.max(1);
        let ids = self.run_ids()?;
        if ids.len() <= retain {
            return Ok(Vec::new());
        }
        let excess = ids.len() - retain;
        let mut removed = Vec::with_capacity(excess);
        for id in ids.into_iter().take(excess) {
            let dir = self.run_dir(&id);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => removed.push(id),
                Err(err) => {
                    warn!(run_id = id.as_str(), "evidence prune failed: {err}");
                    return Err(WorkbenchError::io(&dir, err));
                }
            }
        }
        debug!(removed = removed.len(), "evidence runs pruned");
        Ok(removed)
    }
}

/// Checks the exact `YYYY-MM-DDTHH-mm-ssZ` shape so stray directories
/// are never pruned.
#[must_use]
pub fn is_run_id(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() != 20 {
        return false;
    }
    for (index, byte) in bytes.iter().enumerate() {
        let ok = match index {
            4 | 7 => *byte == b'-',
            10 => *byte == b'T',
            13 | 16 => *byte == b'-',
            19 => *byte == b'Z',
            _ => byte.is_ascii_digit(),
        };
        if !ok {
            return false;
        }
    }
    true
}
