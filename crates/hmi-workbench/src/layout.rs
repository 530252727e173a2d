//! Workspace layout store: the descriptor file set on disk.
//!
//! A layout directory holds reserved descriptors (`_config.toml`,
//! `_intent.toml`, `_journeys.toml`), page files (any other `*.toml`),
//! and SVG page assets. The store reads the whole set into memory as
//! text; mutation happens elsewhere (patch reconciler, lock writer) as
//! read-set / compute / write-diffs.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::WorkbenchError;

/// Reserved descriptor file holding policy and polling config.
pub const CONFIG_FILE: &str = "_config.toml";
/// Reserved descriptor file with the authoring intent statement.
pub const INTENT_FILE: &str = "_intent.toml";
/// Reserved descriptor file with journey definitions.
pub const JOURNEYS_FILE: &str = "_journeys.toml";

/// One file of the descriptor set, held as raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutDescriptorFile {
    pub name: String,
    pub relative_path: PathBuf,
    pub raw_text: String,
}

/// Kind of a descriptor file, derived from its reserved name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Config,
    Intent,
    Journeys,
    Page,
    Asset,
}

impl LayoutDescriptorFile {
    #[must_use]
    pub fn kind(&self) -> DescriptorKind {
        match self.name.as_str() {
            CONFIG_FILE => DescriptorKind::Config,
            INTENT_FILE => DescriptorKind::Intent,
            JOURNEYS_FILE => DescriptorKind::Journeys,
            name if name.ends_with(".svg") => DescriptorKind::Asset,
            _ => DescriptorKind::Page,
        }
    }
}

/// A binding reference extracted from a page file.
///
/// Not deduplicated per file; identity sets deduplicate by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRef {
    pub source_file: String,
    pub path: String,
}

/// Write policy parsed from the `[write]` section of `_config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WritePolicy {
    pub enabled: Option<bool>,
    #[serde(default)]
    pub allow: Vec<String>,
}

impl WritePolicy {
    #[must_use]
    pub fn write_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    #[must_use]
    pub fn allowlist(&self) -> BTreeSet<String> {
        self.allow
            .iter()
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PollConfigToml {
    interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LayoutConfigToml {
    #[serde(default)]
    write: WritePolicy,
    #[serde(default)]
    poll: PollConfigToml,
}

/// Parsed view of `_config.toml` (policy plus polling).
#[derive(Debug, Clone, Default)]
pub struct LayoutConfig {
    pub write: WritePolicy,
    pub poll_interval_ms: Option<u64>,
}

/// In-memory snapshot of one descriptor directory.
#[derive(Debug, Clone)]
pub struct LayoutSnapshot {
    root: PathBuf,
    files: Vec<LayoutDescriptorFile>,
}

impl LayoutSnapshot {
    /// Reads every descriptor file under `root` as text.
    ///
    /// Files are ordered by name so snapshots of the same directory are
    /// identical across calls.
    pub fn load(root: &Path) -> Result<Self, WorkbenchError> {
        let mut paths = BTreeSet::new();
        for pattern in ["*.toml", "*.svg"] {
            let full = format!("{}/{pattern}", root.display());
            let matches = glob::glob(&full).map_err(|err| {
                WorkbenchError::InvalidDescriptor {
                    file: smol_str::SmolStr::new(root.to_string_lossy()),
                    message: smol_str::SmolStr::new(err.to_string()),
                }
            })?;
            for entry in matches {
                let path = entry.map_err(|err| WorkbenchError::io(root, err.into_error()))?;
                if path.is_file() {
                    paths.insert(path);
                }
            }
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let raw_text =
                std::fs::read_to_string(&path).map_err(|err| WorkbenchError::io(&path, err))?;
            files.push(LayoutDescriptorFile {
                name: name.to_string(),
                relative_path: PathBuf::from(name),
                raw_text,
            });
        }
        debug!(root = %root.display(), files = files.len(), "layout snapshot loaded");
        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    /// Builds a snapshot from in-memory files (tests, dry runs).
    #[must_use]
    pub fn from_files(root: &Path, files: Vec<LayoutDescriptorFile>) -> Self {
        Self {
            root: root.to_path_buf(),
            files,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn files(&self) -> &[LayoutDescriptorFile] {
        &self.files
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<&LayoutDescriptorFile> {
        self.files.iter().find(|file| file.name == name)
    }

    /// Page files only (reserved descriptors and assets excluded).
    pub fn pages(&self) -> impl Iterator<Item = &LayoutDescriptorFile> {
        self.files
            .iter()
            .filter(|file| file.kind() == DescriptorKind::Page)
    }

    #[must_use]
    pub fn intent_text(&self) -> Option<&str> {
        self.file(INTENT_FILE).map(|file| file.raw_text.as_str())
    }

    #[must_use]
    pub fn journeys_text(&self) -> Option<&str> {
        self.file(JOURNEYS_FILE).map(|file| file.raw_text.as_str())
    }

    /// Parses `_config.toml`; a missing file yields the default config.
    pub fn config(&self) -> Result<LayoutConfig, WorkbenchError> {
        let Some(file) = self.file(CONFIG_FILE) else {
            return Ok(LayoutConfig::default());
        };
        let parsed = toml::from_str::<LayoutConfigToml>(&file.raw_text).map_err(|err| {
            WorkbenchError::InvalidDescriptor {
                file: smol_str::SmolStr::new(CONFIG_FILE),
                message: smol_str::SmolStr::new(err.to_string()),
            }
        })?;
        Ok(LayoutConfig {
            write: parsed.write,
            poll_interval_ms: parsed.poll.interval_ms,
        })
    }

    /// Scans page text for `bind = "..."` and `source = "..."`
    /// declarations. Pages are TOML, but the scan is textual on purpose:
    /// a page that fails to parse still contributes its references, and
    /// the collaborating diagnostics report the parse failure itself.
    #[must_use]
    pub fn binding_refs(&self) -> Vec<BindingRef> {
        let mut refs = Vec::new();
        for page in self.pages() {
            for line in page.raw_text.lines() {
                let Some(path) = binding_from_line(line) else {
                    continue;
                };
                refs.push(BindingRef {
                    source_file: page.name.clone(),
                    path: path.to_string(),
                });
            }
        }
        refs
    }

    /// Distinct referenced binding paths, sorted.
    #[must_use]
    pub fn binding_paths(&self) -> BTreeSet<String> {
        self.binding_refs()
            .into_iter()
            .map(|reference| reference.path)
            .collect()
    }
}

fn binding_from_line(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix("bind")
        .or_else(|| trimmed.strip_prefix("source"))?;
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    let path = rest[..end].trim();
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}
