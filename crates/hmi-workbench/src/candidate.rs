//! Layout candidate generation and scoring.
//!
//! Strategies are a closed, hand-authored set of four presets. Scoring
//! is closed-form over binding count, section count, boolean-type
//! ratio, and the preset's density/bias parameters; the overall score
//! weights the three metrics by priorities parsed out of the intent
//! text. Identical inputs always produce identical candidates and
//! ranks.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Serialize;
use smol_str::SmolStr;

use crate::catalog::{canonical_widget_id, CatalogOutcome};
use crate::error::WorkbenchError;
use crate::evidence::EvidenceStore;
use crate::layout::BindingRef;

/// Axis a strategy groups bindings on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupAxis {
    /// Declaring program (globals group together).
    Program,
    /// Catalog qualifier of the binding.
    Qualifier,
    /// Leading dotted path segment, verbatim.
    PathSegment,
}

/// One fixed layout strategy preset.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CandidateStrategy {
    pub id: &'static str,
    pub label: &'static str,
    pub axis: GroupAxis,
    /// Packing density in [0, 1]; denser layouts read worse.
    pub density: f64,
    /// Emphasis on actionable widgets in [0, 1].
    pub widget_bias: f64,
    pub alarm_emphasis: bool,
}

/// The closed strategy set, in authored order.
pub const STRATEGIES: [CandidateStrategy; 4] = [
    CandidateStrategy {
        id: "process-flow",
        label: "Process flow",
        axis: GroupAxis::Program,
        density: 0.55,
        widget_bias: 0.8,
        alarm_emphasis: false,
    },
    CandidateStrategy {
        id: "alarm-first",
        label: "Alarm first",
        axis: GroupAxis::Program,
        density: 0.5,
        widget_bias: 0.45,
        alarm_emphasis: true,
    },
    CandidateStrategy {
        id: "qualifier-tiers",
        label: "Qualifier tiers",
        axis: GroupAxis::Qualifier,
        density: 0.75,
        widget_bias: 0.6,
        alarm_emphasis: true,
    },
    CandidateStrategy {
        id: "compact-grid",
        label: "Compact grid",
        axis: GroupAxis::PathSegment,
        density: 1.0,
        widget_bias: 0.35,
        alarm_emphasis: false,
    },
];

/// Candidate metric block; every value clamped to [0, 100] and rounded
/// to two decimals.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct CandidateMetrics {
    pub readability: f64,
    pub action_latency: f64,
    pub alarm_salience: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreviewSection {
    pub title: String,
    pub widget_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CandidatePreview {
    pub title: String,
    pub sections: Vec<PreviewSection>,
}

/// One ranked alternative layout.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub id: SmolStr,
    pub rank: u32,
    pub strategy: CandidateStrategy,
    pub metrics: CandidateMetrics,
    pub summary: String,
    pub preview: CandidatePreview,
}

/// Normalized metric weights derived from the intent statement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentWeights {
    pub readability: f64,
    pub action_latency: f64,
    pub alarm_salience: f64,
}

const READABILITY_KEYWORDS: [&str; 6] =
    ["clarity", "clear", "readab", "legib", "glance", "overview"];
const LATENCY_KEYWORDS: [&str; 5] = ["fast", "quick", "latency", "action", "response"];
const SAFETY_KEYWORDS: [&str; 6] = ["alarm", "safety", "safe", "fault", "critical", "interlock"];
const KEYWORD_BOOST: f64 = 1.5;

/// Parses free-text priorities into normalized weights.
///
/// Each bucket starts at 1.0; every keyword hit adds 1.5 to its bucket;
/// the three buckets are normalized to sum to 1.
#[must_use]
pub fn intent_weights(intent_text: Option<&str>) -> IntentWeights {
    let text = intent_text.unwrap_or("").to_ascii_lowercase();
    let score = |keywords: &[&str]| -> f64 {
        let hits = keywords
            .iter()
            .filter(|keyword| text.contains(*keyword))
            .count();
        1.0 + KEYWORD_BOOST * hits as f64
    };
    let readability = score(&READABILITY_KEYWORDS);
    let action_latency = score(&LATENCY_KEYWORDS);
    let alarm_salience = score(&SAFETY_KEYWORDS);
    let total = readability + action_latency + alarm_salience;
    IntentWeights {
        readability: readability / total,
        action_latency: action_latency / total,
        alarm_salience: alarm_salience / total,
    }
}

/// Generates up to `count` ranked candidates (clamped to [1, 4]).
#[must_use]
pub fn generate_candidates(
    refs: &[BindingRef],
    catalog: &CatalogOutcome,
    intent_text: Option<&str>,
    count: usize,
) -> Vec<Candidate> {
    let count = count.clamp(1, STRATEGIES.len());
    let weights = intent_weights(intent_text);

    // Union of referenced bind paths; fall back to the catalog when the
    // layout has no references yet.
    let mut paths: BTreeSet<String> = refs.iter().map(|reference| reference.path.clone()).collect();
    if paths.is_empty() {
        paths = catalog
            .entries
            .iter()
            .map(|entry| entry.path.clone())
            .collect();
    }

    let bool_ratio = boolean_ratio(&paths, catalog);

    let mut candidates: Vec<Candidate> = STRATEGIES
        .iter()
        .take(count)
        .map(|strategy| build_candidate(strategy, &paths, catalog, bool_ratio, weights))
        .collect();

    candidates.sort_by(|a, b| {
        b.metrics
            .overall
            .partial_cmp(&a.metrics.overall)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    for (index, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = index as u32 + 1;
    }
    candidates
}

/// Writes the ranked candidate list as the run's `candidates.json`.
pub fn record_candidates(
    store: &EvidenceStore,
    run_id: &str,
    candidates: &[Candidate],
) -> Result<PathBuf, WorkbenchError> {
    let artifact = serde_json::json!({
        "count": candidates.len(),
        "candidates": candidates,
    });
    store.write_artifact(run_id, "candidates.json", &artifact)
}

fn build_candidate(
    strategy: &CandidateStrategy,
    paths: &BTreeSet<String>,
    catalog: &CatalogOutcome,
    bool_ratio: f64,
    weights: IntentWeights,
) -> Candidate {
    let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for path in paths {
        let key = group_key(strategy.axis, path, catalog);
        groups
            .entry(key)
            .or_default()
            .insert(canonical_widget_id(path));
    }

    let sections: Vec<PreviewSection> = groups
        .into_iter()
        .map(|(title, ids)| PreviewSection {
            title,
            widget_ids: ids.into_iter().collect(),
        })
        .collect();

    let metrics = score(strategy, paths.len(), sections.len(), bool_ratio, weights);
    let summary = format!(
        "{}: {} bindings across {} sections",
        strategy.label,
        paths.len(),
        sections.len()
    );

    Candidate {
        id: SmolStr::new(strategy.id),
        rank: 0,
        strategy: *strategy,
        metrics,
        summary,
        preview: CandidatePreview {
            title: strategy.label.to_string(),
            sections,
        },
    }
}

fn group_key(axis: GroupAxis, path: &str, catalog: &CatalogOutcome) -> String {
    match axis {
        GroupAxis::Program => match path.split_once('.') {
            Some(("global", _)) | None => "Globals".to_string(),
            Some((program, _)) => program.to_string(),
        },
        GroupAxis::Qualifier => catalog
            .entry_for_path(path)
            .map_or_else(|| "UNKNOWN".to_string(), |entry| entry.qualifier.to_string()),
        GroupAxis::PathSegment => path
            .split_once('.')
            .map_or_else(|| path.to_string(), |(head, _)| head.to_string()),
    }
}

fn boolean_ratio(paths: &BTreeSet<String>, catalog: &CatalogOutcome) -> f64 {
    if paths.is_empty() {
        return 0.0;
    }
    let booleans = paths
        .iter()
        .filter(|path| {
            catalog
                .entry_for_path(path)
                .is_some_and(|entry| entry.data_type.eq_ignore_ascii_case("BOOL"))
        })
        .count();
    booleans as f64 / paths.len() as f64
}

fn score(
    strategy: &CandidateStrategy,
    bindings: usize,
    sections: usize,
    bool_ratio: f64,
    weights: IntentWeights,
) -> CandidateMetrics {
    let sections_f = sections.max(1) as f64;
    let per_section = bindings as f64 / sections_f;

    let readability = round2(clamp(
        96.0 - strategy.density * 25.0 - (per_section - 4.0).max(0.0) * 7.0,
    ));
    let action_latency = round2(clamp(
        70.0 + strategy.widget_bias * 20.0 + strategy.density * 10.0 - sections_f * 3.0,
    ));
    let alarm_salience = round2(clamp(
        35.0 + if strategy.alarm_emphasis { 40.0 } else { 0.0 } + bool_ratio * 25.0,
    ));
    let overall = round2(clamp(
        readability * weights.readability
            + action_latency * weights.action_latency
            + alarm_salience * weights.alarm_salience,
    ));

    CandidateMetrics {
        readability,
        action_latency,
        alarm_salience,
        overall,
    }
}

fn clamp(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::catalog::resolve_catalog_outcome;

    fn refs(paths: &[&str]) -> Vec<BindingRef> {
        paths
            .iter()
            .map(|path| BindingRef {
                source_file: "overview.toml".to_string(),
                path: (*path).to_string(),
            })
            .collect()
    }

    fn catalog() -> CatalogOutcome {
        resolve_catalog_outcome(&json!({
            "programs": [
                {"name": "Main", "variables": [
                    {"name": "speed", "type": "REAL", "qualifier": "VAR", "writable": true},
                    {"name": "run", "type": "BOOL", "qualifier": "VAR", "writable": true}
                ]},
                {"name": "Pump", "variables": [
                    {"name": "flow", "type": "REAL", "qualifier": "VAR_OUTPUT", "writable": false}
                ]}
            ],
            "globals": [
                {"name": "EStop", "type": "BOOL", "qualifier": "VAR_GLOBAL", "writable": false}
            ]
        }))
    }

    #[test]
    fn weights_default_to_even_thirds() {
        let weights = intent_weights(None);
        assert!((weights.readability - 1.0 / 3.0).abs() < 1e-9);
        assert!(
            (weights.readability + weights.action_latency + weights.alarm_salience - 1.0).abs()
                < 1e-9
        );
    }

    #[test]
    fn safety_keywords_shift_weight_toward_alarms() {
        let weights = intent_weights(Some(
            "Operators need alarm visibility and safety interlock awareness.",
        ));
        assert!(weights.alarm_salience > weights.readability);
        assert!(weights.alarm_salience > weights.action_latency);
    }

    #[test]
    fn generation_is_deterministic() {
        let refs = refs(&["Main.speed", "Main.run", "Pump.flow", "global.EStop"]);
        let catalog = catalog();
        let intent = Some("Fast actions, clear overview.");
        let first = generate_candidates(&refs, &catalog, intent, 3);
        let second = generate_candidates(&refs, &catalog, intent, 3);
        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.rank, b.rank);
            assert_eq!(a.metrics.overall, b.metrics.overall);
        }
        let ranks: Vec<u32> = first.iter().map(|candidate| candidate.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn count_is_clamped_to_strategy_set() {
        let refs = refs(&["Main.speed"]);
        let catalog = catalog();
        assert_eq!(generate_candidates(&refs, &catalog, None, 0).len(), 1);
        assert_eq!(generate_candidates(&refs, &catalog, None, 99).len(), 4);
    }

    #[test]
    fn sections_group_by_axis_with_sorted_deduped_ids() {
        let refs = refs(&["Main.run", "Main.run", "Main.speed", "global.EStop"]);
        let catalog = catalog();
        let candidates = generate_candidates(&refs, &catalog, None, 4);
        let process_flow = candidates
            .iter()
            .find(|candidate| candidate.id == "process-flow")
            .expect("process-flow candidate");
        let titles: Vec<&str> = process_flow
            .preview
            .sections
            .iter()
            .map(|section| section.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Globals", "Main"]);
        let main = &process_flow.preview.sections[1];
        assert_eq!(
            main.widget_ids,
            vec![
                "resource/resource/program/main/field/run".to_string(),
                "resource/resource/program/main/field/speed".to_string(),
            ]
        );
    }

    #[test]
    fn empty_refs_fall_back_to_catalog_paths() {
        let catalog = catalog();
        let candidates = generate_candidates(&[], &catalog, None, 1);
        let total_ids: usize = candidates[0]
            .preview
            .sections
            .iter()
            .map(|section| section.widget_ids.len())
            .sum();
        assert_eq!(total_ids, 4);
    }

    #[test]
    fn metrics_are_clamped_and_rounded() {
        let refs = refs(&["Main.run"]);
        let catalog = catalog();
        for candidate in generate_candidates(&refs, &catalog, None, 4) {
            for value in [
                candidate.metrics.readability,
                candidate.metrics.action_latency,
                candidate.metrics.alarm_salience,
                candidate.metrics.overall,
            ] {
                assert!((0.0..=100.0).contains(&value));
                assert_eq!(round2(value), value);
            }
        }
    }
}
