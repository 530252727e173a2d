//! Structural patch reconciliation over the descriptor file set.
//!
//! Operations are evaluated against a working copy of the page files;
//! a single conflict aborts the whole patch with zero filesystem
//! effect. On success only files whose content actually changed are
//! written, and removed targets are deleted.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::debug;

use crate::error::WorkbenchError;
use crate::layout::{DescriptorKind, LayoutSnapshot};

/// One structural edit, JSON-Patch-shaped but scoped to descriptor files.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub from: Option<String>,
}

/// A rejected operation. The whole patch fails when any conflict exists.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PatchConflict {
    pub code: SmolStr,
    pub op_index: usize,
    pub path: String,
    pub message: String,
}

/// Filesystem action taken for one file on commit.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchAction {
    Add,
    Replace,
    Remove,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChangedFile {
    pub file: String,
    pub action: PatchAction,
}

/// Outcome of one reconciliation call.
#[derive(Debug, Clone, Serialize)]
pub struct PatchOutcome {
    pub ok: bool,
    pub conflicts: Vec<PatchConflict>,
    pub changed: Vec<ChangedFile>,
}

const CONFLICT_INVALID_OP: &str = "INVALID_OP";
const CONFLICT_INVALID_PATH: &str = "INVALID_PATH";
const CONFLICT_INVALID_FROM: &str = "INVALID_FROM";
const CONFLICT_NOT_FOUND: &str = "NOT_FOUND";
const CONFLICT_EXISTS: &str = "CONFLICT_EXISTS";
const CONFLICT_TYPE_MISMATCH: &str = "TYPE_MISMATCH";

/// Applies `operations` to the snapshot's page file set.
///
/// `dry_run` (or any conflict) short-circuits before any write. Partial
/// application is prohibited: either every operation lands or none does.
pub fn apply_patch(
    snapshot: &LayoutSnapshot,
    operations: &[PatchOperation],
    dry_run: bool,
) -> Result<PatchOutcome, WorkbenchError> {
    // Working copy, keyed by file name in snapshot order.
    let original: IndexMap<String, String> = snapshot
        .files()
        .iter()
        .filter(|file| file.kind() != DescriptorKind::Asset)
        .map(|file| (file.name.clone(), file.raw_text.clone()))
        .collect();
    let mut working = original.clone();
    let mut conflicts = Vec::new();

    for (index, operation) in operations.iter().enumerate() {
        if let Err(conflict) = apply_one(&mut working, index, operation) {
            conflicts.push(conflict);
        }
    }

    if !conflicts.is_empty() {
        debug!(conflicts = conflicts.len(), "patch rejected");
        return Ok(PatchOutcome {
            ok: false,
            conflicts,
            changed: Vec::new(),
        });
    }

    let mut changed = Vec::new();
    for (name, content) in &working {
        match original.get(name) {
            None => changed.push(ChangedFile {
                file: name.clone(),
                action: PatchAction::Add,
            }),
            Some(previous) if previous != content => changed.push(ChangedFile {
                file: name.clone(),
                action: PatchAction::Replace,
            }),
            Some(_) => {}
        }
    }
    for name in original.keys() {
        if !working.contains_key(name) {
            changed.push(ChangedFile {
                file: name.clone(),
                action: PatchAction::Remove,
            });
        }
    }
    changed.sort_by(|a, b| a.file.cmp(&b.file));

    if !dry_run {
        for entry in &changed {
            let target = snapshot.root().join(&entry.file);
            match entry.action {
                PatchAction::Add | PatchAction::Replace => {
                    let content = &working[&entry.file];
                    std::fs::write(&target, content)
                        .map_err(|err| WorkbenchError::io(&target, err))?;
                }
                PatchAction::Remove => {
                    std::fs::remove_file(&target)
                        .map_err(|err| WorkbenchError::io(&target, err))?;
                }
            }
        }
        debug!(changed = changed.len(), "patch committed");
    }

    Ok(PatchOutcome {
        ok: true,
        conflicts: Vec::new(),
        changed,
    })
}

fn apply_one(
    working: &mut IndexMap<String, String>,
    index: usize,
    operation: &PatchOperation,
) -> Result<(), PatchConflict> {
    let conflict = |code: &str, message: String| PatchConflict {
        code: SmolStr::new(code),
        op_index: index,
        path: operation.path.clone(),
        message,
    };

    let target = parse_file_pointer(&operation.path)
        .ok_or_else(|| conflict(CONFLICT_INVALID_PATH, format!("unsupported path '{}'", operation.path)))?;

    match operation.op.as_str() {
        "add" => {
            let content = string_value(operation)
                .ok_or_else(|| conflict(CONFLICT_TYPE_MISMATCH, "add requires a string value".into()))?;
            if working.contains_key(target) {
                return Err(conflict(
                    CONFLICT_EXISTS,
                    format!("file '{target}' already exists"),
                ));
            }
            working.insert(target.to_string(), content);
            Ok(())
        }
        "replace" => {
            let content = string_value(operation).ok_or_else(|| {
                conflict(CONFLICT_TYPE_MISMATCH, "replace requires a string value".into())
            })?;
            match working.get_mut(target) {
                Some(slot) => {
                    *slot = content;
                    Ok(())
                }
                None => Err(conflict(
                    CONFLICT_NOT_FOUND,
                    format!("file '{target}' does not exist"),
                )),
            }
        }
        "remove" => {
            if working.shift_remove(target).is_none() {
                return Err(conflict(
                    CONFLICT_NOT_FOUND,
                    format!("file '{target}' does not exist"),
                ));
            }
            Ok(())
        }
        "move" => {
            let from_pointer = operation.from.as_deref().ok_or_else(|| {
                conflict(CONFLICT_INVALID_FROM, "move requires a 'from' pointer".into())
            })?;
            let source = parse_file_pointer(from_pointer).ok_or_else(|| {
                conflict(
                    CONFLICT_INVALID_FROM,
                    format!("unsupported from pointer '{from_pointer}'"),
                )
            })?;
            if working.contains_key(target) {
                return Err(conflict(
                    CONFLICT_EXISTS,
                    format!("destination '{target}' already exists"),
                ));
            }
            match working.shift_remove(source) {
                Some(content) => {
                    working.insert(target.to_string(), content);
                    Ok(())
                }
                None => Err(conflict(
                    CONFLICT_NOT_FOUND,
                    format!("source '{source}' does not exist"),
                )),
            }
        }
        other => Err(conflict(CONFLICT_INVALID_OP, format!("unknown op '{other}'"))),
    }
}

/// Accepts `/files/<name>.toml` and `/files/<name>.toml/content`.
fn parse_file_pointer(pointer: &str) -> Option<&str> {
    let rest = pointer.strip_prefix("/files/")?;
    let name = rest.strip_suffix("/content").unwrap_or(rest);
    if name.is_empty() || name.contains('/') || !name.ends_with(".toml") {
        return None;
    }
    Some(name)
}

fn string_value(operation: &PatchOperation) -> Option<String> {
    match operation.value.as_ref()? {
        serde_json::Value::String(text) => Some(text.clone()),
        _ => None,
    }
}
