//! Binding catalog resolution and canonical widget identity.

use serde::Serialize;
use smol_str::SmolStr;

const UNKNOWN_TYPE: &str = "UNKNOWN";

/// One process variable exposed by the runtime, in canonical form.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BindingCatalogEntry {
    pub id: String,
    pub path: String,
    pub data_type: SmolStr,
    pub qualifier: SmolStr,
    pub writable: bool,
    pub unit: Option<SmolStr>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<SmolStr>,
}

/// Resolution result: the entries plus how the catalog was obtained.
///
/// `loaded` is false when the runtime was unreachable; validation then
/// downgrades unknown-binding errors to warnings instead of pretending
/// the layout was checked. `read_only` mirrors the runtime schema flag
/// and feeds the journey write guard.
#[derive(Debug, Clone, Default)]
pub struct CatalogOutcome {
    pub entries: Vec<BindingCatalogEntry>,
    pub loaded: bool,
    pub read_only: bool,
}

impl CatalogOutcome {
    #[must_use]
    pub fn unavailable() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entry_for_path(&self, path: &str) -> Option<&BindingCatalogEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    #[must_use]
    pub fn entry_for_id(&self, id: &str) -> Option<&BindingCatalogEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }
}

/// Lower-cases and collapses every non-alphanumeric run to a single `-`.
///
/// Empty results map to `unnamed` so ids always have a final component.
#[must_use]
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}

/// Derives the canonical widget id for a binding path.
///
/// `Program.Field` becomes `resource/resource/program/<slug>/field/<slug>`,
/// `global.Name` becomes `resource/resource/global/<slug>`. A path with no
/// dot is treated as a bare global. Two paths that slug identically
/// collapse to one id; map insertion is last-wins.
#[must_use]
pub fn canonical_widget_id(path: &str) -> String {
    match path.split_once('.') {
        Some(("global", rest)) => format!("resource/resource/global/{}", slug(rest)),
        Some((program, field)) => format!(
            "resource/resource/program/{}/field/{}",
            slug(program),
            slug(field)
        ),
        None => format!("resource/resource/global/{}", slug(path)),
    }
}

/// Resolves a raw symbol-table response into catalog entries.
///
/// Total over well-formed JSON: missing or mistyped fields default
/// (`UNKNOWN` strings, `false`/`None` scalars) instead of failing.
/// Entries are sorted by path then id for deterministic downstream
/// hashing.
#[must_use]
pub fn resolve_catalog(raw: &serde_json::Value) -> Vec<BindingCatalogEntry> {
    let mut entries = Vec::new();

    for program in json_array(raw.get("programs")) {
        let program_name = json_str(program.get("name")).unwrap_or(UNKNOWN_TYPE);
        for variable in json_array(program.get("variables")) {
            let name = json_str(variable.get("name")).unwrap_or(UNKNOWN_TYPE);
            let path = format!("{program_name}.{name}");
            entries.push(entry_from_variable(path, variable));
        }
    }

    for global in json_array(raw.get("globals")) {
        let name = json_str(global.get("name")).unwrap_or(UNKNOWN_TYPE);
        let path = format!("global.{name}");
        entries.push(entry_from_variable(path, global));
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
    entries
}

/// Resolves the catalog and captures the schema mode flags.
#[must_use]
pub fn resolve_catalog_outcome(raw: &serde_json::Value) -> CatalogOutcome {
    CatalogOutcome {
        entries: resolve_catalog(raw),
        loaded: true,
        read_only: raw
            .get("read_only")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
    }
}

fn entry_from_variable(path: String, variable: &serde_json::Value) -> BindingCatalogEntry {
    BindingCatalogEntry {
        id: canonical_widget_id(&path),
        path,
        data_type: SmolStr::new(json_str(variable.get("type")).unwrap_or(UNKNOWN_TYPE)),
        qualifier: SmolStr::new(json_str(variable.get("qualifier")).unwrap_or(UNKNOWN_TYPE)),
        writable: variable
            .get("writable")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
        unit: json_str(variable.get("unit")).map(SmolStr::new),
        min: variable.get("min").and_then(serde_json::Value::as_f64),
        max: variable.get("max").and_then(serde_json::Value::as_f64),
        enum_values: json_array(variable.get("enum_values"))
            .iter()
            .filter_map(|value| value.as_str())
            .map(SmolStr::new)
            .collect(),
    }
}

fn json_array(value: Option<&serde_json::Value>) -> &[serde_json::Value] {
    value
        .and_then(serde_json::Value::as_array)
        .map_or(&[], Vec::as_slice)
}

fn json_str(value: Option<&serde_json::Value>) -> Option<&str> {
    value.and_then(serde_json::Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn slug_collapses_runs_and_lowercases() {
        assert_eq!(slug("Main"), "main");
        assert_eq!(slug("Tank_Level"), "tank-level");
        assert_eq!(slug("A//B..C"), "a-b-c");
        assert_eq!(slug("__"), "unnamed");
    }

    #[test]
    fn canonical_id_is_pure_and_namespaced() {
        let first = canonical_widget_id("Main.speed");
        let second = canonical_widget_id("Main.speed");
        assert_eq!(first, second);
        assert_eq!(first, "resource/resource/program/main/field/speed");
        assert_eq!(
            canonical_widget_id("global.EmergencyStop"),
            "resource/resource/global/emergencystop"
        );
        assert_eq!(
            canonical_widget_id("Pump_Station.Flow Rate"),
            "resource/resource/program/pump-station/field/flow-rate"
        );
    }

    #[test]
    fn resolve_catalog_defaults_missing_fields() {
        let raw = json!({
            "programs": [
                {"name": "Main", "variables": [
                    {"name": "speed", "type": "REAL", "qualifier": "VAR", "writable": true,
                     "unit": "rpm", "min": 0.0, "max": 100.0},
                    {"name": "mystery"}
                ]}
            ],
            "globals": [
                {"name": "EStop", "type": "BOOL", "writable": false}
            ]
        });
        let entries = resolve_catalog(&raw);
        assert_eq!(entries.len(), 3);

        let mystery = entries
            .iter()
            .find(|entry| entry.path == "Main.mystery")
            .expect("mystery entry");
        assert_eq!(mystery.data_type, UNKNOWN_TYPE);
        assert_eq!(mystery.qualifier, UNKNOWN_TYPE);
        assert!(!mystery.writable);
        assert!(mystery.unit.is_none());
        assert!(mystery.min.is_none());

        let estop = entries
            .iter()
            .find(|entry| entry.path == "global.EStop")
            .expect("estop entry");
        assert_eq!(estop.id, "resource/resource/global/estop");
    }

    #[test]
    fn resolve_catalog_sorts_by_path_then_id() {
        let raw = json!({
            "programs": [
                {"name": "Zeta", "variables": [{"name": "a", "type": "INT"}]},
                {"name": "Alpha", "variables": [{"name": "z", "type": "INT"}]}
            ],
            "globals": []
        });
        let entries = resolve_catalog(&raw);
        let paths: Vec<&str> = entries.iter().map(|entry| entry.path.as_str()).collect();
        assert_eq!(paths, vec!["Alpha.z", "Zeta.a"]);
    }

    #[test]
    fn outcome_carries_read_only_flag() {
        let outcome = resolve_catalog_outcome(&json!({"read_only": true, "programs": [], "globals": []}));
        assert!(outcome.loaded);
        assert!(outcome.read_only);
        assert!(CatalogOutcome::unavailable().entries.is_empty());
    }
}
