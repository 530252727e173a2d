//! Cross-validation of the descriptor set against catalog and policy,
//! plus lock construction and evidence persistence.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Serialize;
use smol_str::SmolStr;
use tracing::debug;

use crate::catalog::{canonical_widget_id, CatalogOutcome};
use crate::error::WorkbenchError;
use crate::evidence::EvidenceStore;
use crate::layout::LayoutSnapshot;
use crate::lock::{LockConstraints, LockEntry, LockFile, LOCK_FILE};

/// Canonical id namespace prefix every allowlist entry should carry.
const ALLOW_PREFIX: &str = "resource/";
const POLL_MIN_MS: u64 = 50;
const POLL_MAX_MS: u64 = 1000;

/// Check severity, ordered by rank (errors sort first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckSeverity {
    Error,
    Warning,
    Info,
}

/// One validation finding.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationCheck {
    pub code: SmolStr,
    pub severity: CheckSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Zero-based line span, when the finding points into a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<(u32, u32)>,
}

/// Diagnostic supplied by the collaborating language tooling,
/// mapped 1:1 into a validation check.
#[derive(Debug, Clone)]
pub struct FileDiagnostic {
    pub file: String,
    pub severity: CheckSeverity,
    pub message: String,
    pub code: Option<SmolStr>,
    pub range: Option<(u32, u32)>,
}

/// Validation options.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub dry_run: bool,
    pub prune: bool,
    pub retain_runs: usize,
    /// Explicit run id; defaults to the current UTC second.
    pub run_id: Option<String>,
}

/// Aggregated validation result.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// True when no error-severity check fired.
    pub ok: bool,
    pub checks: Vec<ValidationCheck>,
    pub lock: LockFile,
    /// Where the lock was (or would be) written.
    pub lock_path: PathBuf,
    /// Evidence run that received `validation.json` (non-dry-run only).
    pub run_id: Option<String>,
    /// Run ids removed by retention pruning, oldest first.
    pub removed_runs: Vec<String>,
}

/// Validates the snapshot and persists lock + evidence unless `dry_run`.
pub fn validate(
    snapshot: &LayoutSnapshot,
    catalog: &CatalogOutcome,
    diagnostics: &[FileDiagnostic],
    options: &ValidateOptions,
) -> Result<ValidationReport, WorkbenchError> {
    let config = snapshot.config()?;
    let refs = snapshot.binding_refs();
    let mut checks = Vec::new();

    if refs.is_empty() {
        checks.push(ValidationCheck {
            code: SmolStr::new("HMI_VALIDATE_NO_BINDINGS"),
            severity: CheckSeverity::Warning,
            message: "no bind/source references found in any page file".to_string(),
            file: None,
            range: None,
        });
    }

    let allowlist = config.write.allowlist();
    if config.write.write_enabled() && allowlist.is_empty() {
        checks.push(ValidationCheck {
            code: SmolStr::new("HMI_VALIDATE_WRITE_ALLOW_EMPTY"),
            severity: CheckSeverity::Error,
            message: "[write] enabled=true with an empty allow list".to_string(),
            file: Some(crate::layout::CONFIG_FILE.to_string()),
            range: None,
        });
    }
    for entry in &allowlist {
        // Raw binding paths are tolerated at runtime but flagged here so
        // lock diffs stay keyed on canonical ids.
        if !entry.starts_with(ALLOW_PREFIX) {
            checks.push(ValidationCheck {
                code: SmolStr::new("HMI_VALIDATE_ALLOW_NOT_CANONICAL"),
                severity: CheckSeverity::Warning,
                message: format!("allow entry '{entry}' is not a canonical '{ALLOW_PREFIX}' id"),
                file: Some(crate::layout::CONFIG_FILE.to_string()),
                range: None,
            });
        }
    }

    if let Some(interval) = config.poll_interval_ms {
        if interval < POLL_MIN_MS {
            checks.push(ValidationCheck {
                code: SmolStr::new("HMI_VALIDATE_POLL_TOO_FAST"),
                severity: CheckSeverity::Warning,
                message: format!("poll interval {interval} ms is below the {POLL_MIN_MS} ms floor"),
                file: Some(crate::layout::CONFIG_FILE.to_string()),
                range: None,
            });
        } else if interval > POLL_MAX_MS {
            checks.push(ValidationCheck {
                code: SmolStr::new("HMI_VALIDATE_POLL_TOO_SLOW"),
                severity: CheckSeverity::Warning,
                message: format!(
                    "poll interval {interval} ms is above the {POLL_MAX_MS} ms ceiling"
                ),
                file: Some(crate::layout::CONFIG_FILE.to_string()),
                range: None,
            });
        }
    }

    // referencing files per distinct path, for lock entries and check
    // attribution.
    let mut referencing: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for reference in &refs {
        referencing
            .entry(reference.path.clone())
            .or_default()
            .insert(reference.source_file.clone());
    }

    for (path, files) in &referencing {
        if catalog.entry_for_path(path).is_some() {
            continue;
        }
        // An unreachable runtime must not mask itself as "validated":
        // unknown paths stay visible, but only as warnings.
        let severity = if catalog.loaded {
            CheckSeverity::Error
        } else {
            CheckSeverity::Warning
        };
        checks.push(ValidationCheck {
            code: SmolStr::new("HMI_VALIDATE_UNKNOWN_BINDING"),
            severity,
            message: if catalog.loaded {
                format!("binding path '{path}' has no catalog entry")
            } else {
                format!("binding path '{path}' could not be checked (catalog unavailable)")
            },
            file: files.iter().next().cloned(),
            range: None,
        });
    }

    for diagnostic in diagnostics {
        checks.push(ValidationCheck {
            code: diagnostic
                .code
                .clone()
                .unwrap_or_else(|| SmolStr::new("HMI_VALIDATE_DIAGNOSTIC")),
            severity: diagnostic.severity,
            message: diagnostic.message.clone(),
            file: Some(diagnostic.file.clone()),
            range: diagnostic.range,
        });
    }

    checks.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.code.cmp(&b.code))
            .then_with(|| a.message.cmp(&b.message))
    });

    let lock = build_lock(&referencing, catalog);
    let ok = !checks
        .iter()
        .any(|check| check.severity == CheckSeverity::Error);
    let lock_path = snapshot.root().join(LOCK_FILE);

    let mut run_id = None;
    let mut removed_runs = Vec::new();
    if !options.dry_run {
        let rendered = lock.render();
        let previous = std::fs::read_to_string(&lock_path).ok();
        if previous.as_deref() != Some(rendered.as_str()) {
            std::fs::write(&lock_path, rendered)
                .map_err(|err| WorkbenchError::io(&lock_path, err))?;
        }

        let store = EvidenceStore::new(snapshot.root());
        let id = options
            .run_id
            .clone()
            .unwrap_or_else(EvidenceStore::new_run_id);
        store.write_artifact(&id, "validation.json", &validation_artifact(ok, &checks))?;
        if options.prune {
            removed_runs = store.prune(options.retain_runs.max(1))?;
        }
        run_id = Some(id);
    }

    debug!(
        ok,
        checks = checks.len(),
        lock_entries = lock.widgets.len(),
        "validation finished"
    );

    Ok(ValidationReport {
        ok,
        checks,
        lock,
        lock_path,
        run_id,
        removed_runs,
    })
}

/// Builds lock entries for every referenced path, or for the whole
/// catalog when the layout references nothing yet. Unknown paths get
/// placeholder fields so the lock stays total over referenced paths.
fn build_lock(
    referencing: &BTreeMap<String, BTreeSet<String>>,
    catalog: &CatalogOutcome,
) -> LockFile {
    let mut entries = Vec::new();
    if referencing.is_empty() {
        for entry in &catalog.entries {
            entries.push(
                LockEntry {
                    id: entry.id.clone(),
                    path: entry.path.clone(),
                    data_type: entry.data_type.to_string(),
                    qualifier: entry.qualifier.to_string(),
                    writable: entry.writable,
                    constraints: LockConstraints {
                        unit: entry.unit.as_ref().map(ToString::to_string),
                        min: entry.min,
                        max: entry.max,
                        enum_values: entry
                            .enum_values
                            .iter()
                            .map(ToString::to_string)
                            .collect(),
                    },
                    referencing_files: Vec::new(),
                    fingerprint: String::new(),
                }
                .sealed(),
            );
        }
    } else {
        for (path, files) in referencing {
            let referencing_files: Vec<String> = files.iter().cloned().collect();
            let entry = match catalog.entry_for_path(path) {
                Some(found) => LockEntry {
                    id: found.id.clone(),
                    path: found.path.clone(),
                    data_type: found.data_type.to_string(),
                    qualifier: found.qualifier.to_string(),
                    writable: found.writable,
                    constraints: LockConstraints {
                        unit: found.unit.as_ref().map(ToString::to_string),
                        min: found.min,
                        max: found.max,
                        enum_values: found
                            .enum_values
                            .iter()
                            .map(ToString::to_string)
                            .collect(),
                    },
                    referencing_files,
                    fingerprint: String::new(),
                },
                None => LockEntry {
                    id: canonical_widget_id(path),
                    path: path.clone(),
                    data_type: "UNKNOWN".to_string(),
                    qualifier: "UNKNOWN".to_string(),
                    writable: false,
                    constraints: LockConstraints::default(),
                    referencing_files,
                    fingerprint: String::new(),
                },
            };
            entries.push(entry.sealed());
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
    LockFile::new(entries)
}

fn validation_artifact(ok: bool, checks: &[ValidationCheck]) -> serde_json::Value {
    let errors = checks
        .iter()
        .filter(|check| check.severity == CheckSeverity::Error)
        .count();
    let warnings = checks
        .iter()
        .filter(|check| check.severity == CheckSeverity::Warning)
        .count();
    serde_json::json!({
        "ok": ok,
        "errors": errors,
        "warnings": warnings,
        "checks": checks,
    })
}
