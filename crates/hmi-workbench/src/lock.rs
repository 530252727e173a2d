//! Content-addressed lock file for layout bindings.
//!
//! The lock file must be reproducible byte-for-byte given the same
//! inputs: every object is serialized with lexicographically sorted
//! keys at every nesting level, and each entry carries a SHA-256
//! fingerprint over its canonical form (fingerprint field excluded).

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current lock file schema version.
pub const LOCK_VERSION: u32 = 1;
/// Lock file name under the layout root.
pub const LOCK_FILE: &str = "hmi.lock.json";

/// Value constraints mirrored from the catalog entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LockConstraints {
    pub unit: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default)]
    pub enum_values: Vec<String>,
}

/// Canonical description of one binding as used by the layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockEntry {
    pub id: String,
    pub path: String,
    pub data_type: String,
    pub qualifier: String,
    pub writable: bool,
    pub constraints: LockConstraints,
    pub referencing_files: Vec<String>,
    pub fingerprint: String,
}

/// The serialized lock document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockFile {
    pub version: u32,
    pub widgets: Vec<LockEntry>,
}

impl LockEntry {
    /// Computes and stores the fingerprint from the other fields.
    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.fingerprint = self.compute_fingerprint();
        self
    }

    /// SHA-256 hex over the canonically key-sorted entry without the
    /// fingerprint field. Stable under field-order permutation; changes
    /// when any field value changes.
    #[must_use]
    pub fn compute_fingerprint(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(map) = &mut value {
            map.remove("fingerprint");
        }
        let canonical = canonical_json(&value);
        let digest = Sha256::digest(canonical.as_bytes());
        let mut out = String::with_capacity(64);
        for byte in digest {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

impl LockFile {
    #[must_use]
    pub fn new(widgets: Vec<LockEntry>) -> Self {
        Self {
            version: LOCK_VERSION,
            widgets,
        }
    }

    /// Renders the byte-stable document: sorted keys, two-space indent,
    /// trailing newline.
    #[must_use]
    pub fn render(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let mut out = String::new();
        write_canonical(&value, 0, true, &mut out);
        out.push('\n');
        out
    }
}

/// Compact canonical JSON: object keys sorted, no whitespace.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, 0, false, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, depth: usize, pretty: bool, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            if keys.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push('{');
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                newline_indent(pretty, depth + 1, out);
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                if pretty {
                    out.push(' ');
                }
                write_canonical(&map[key.as_str()], depth + 1, pretty, out);
            }
            newline_indent(pretty, depth, out);
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            if items.is_empty() {
                out.push_str("[]");
                return;
            }
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                newline_indent(pretty, depth + 1, out);
                write_canonical(item, depth + 1, pretty, out);
            }
            newline_indent(pretty, depth, out);
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}

fn newline_indent(pretty: bool, depth: usize, out: &mut String) {
    if !pretty {
        return;
    }
    out.push('\n');
    for _ in 0..depth {
        out.push_str("  ");
    }
}
