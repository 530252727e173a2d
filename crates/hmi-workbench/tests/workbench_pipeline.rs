use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use hmi_workbench::candidate::{generate_candidates, record_candidates};
use hmi_workbench::catalog::resolve_catalog_outcome;
use hmi_workbench::evidence::EvidenceStore;
use hmi_workbench::layout::LayoutSnapshot;
use hmi_workbench::lock::LOCK_FILE;
use hmi_workbench::patch::{apply_patch, PatchOperation};
use hmi_workbench::snapshot::{render_snapshot, viewport};
use hmi_workbench::validate::{validate, ValidateOptions};

fn temp_dir(prefix: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{stamp}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(path: &Path, content: &str) {
    std::fs::write(path, content).expect("write file");
}

fn catalog() -> hmi_workbench::catalog::CatalogOutcome {
    resolve_catalog_outcome(&json!({
        "read_only": false,
        "programs": [
            {"name": "Main", "variables": [
                {"name": "speed", "type": "REAL", "qualifier": "VAR", "writable": true,
                 "unit": "rpm", "min": 0.0, "max": 3000.0},
                {"name": "run", "type": "BOOL", "qualifier": "VAR", "writable": true},
                {"name": "alarm", "type": "BOOL", "qualifier": "VAR_OUTPUT"}
            ]},
            {"name": "Pump", "variables": [
                {"name": "flow", "type": "REAL", "qualifier": "VAR", "unit": "l/min"}
            ]}
        ],
        "globals": [
            {"name": "EStop", "type": "BOOL", "writable": false}
        ]
    }))
}

fn seed_layout(root: &Path) {
    write_file(
        &root.join("_config.toml"),
        r#"
[write]
enabled = true
allow = ["resource/resource/program/main/field/run"]

[poll]
interval_ms = 250
"#,
    );
    write_file(
        &root.join("_intent.toml"),
        "statement = \"alarm visibility first, quick acknowledge actions\"\n",
    );
    write_file(
        &root.join("overview.toml"),
        r#"
title = "Overview"

[[section]]
title = "Drive"

[[section.widget]]
type = "gauge"
bind = "Main.speed"

[[section.widget]]
type = "toggle"
bind = "Main.run"
"#,
    );
}

#[test]
fn patch_then_validate_then_preview() {
    let root = temp_dir("hmi-workbench-pipeline");
    seed_layout(&root);

    // Patch in an alarms page; a conflicting second add must reject the
    // whole patch without touching the directory.
    let snapshot = LayoutSnapshot::load(&root).expect("load layout");
    let rejected = apply_patch(
        &snapshot,
        &[
            PatchOperation {
                op: "add".to_string(),
                path: "/files/alarms.toml".to_string(),
                value: Some(json!("title = \"Alarms\"\nbind = \"Main.alarm\"\n")),
                from: None,
            },
            PatchOperation {
                op: "add".to_string(),
                path: "/files/overview.toml".to_string(),
                value: Some(json!("title = \"Clobbered\"\n")),
                from: None,
            },
        ],
        false,
    )
    .expect("apply rejected patch");
    assert!(!rejected.ok);
    assert!(!root.join("alarms.toml").exists());

    let accepted = apply_patch(
        &snapshot,
        &[PatchOperation {
            op: "add".to_string(),
            path: "/files/alarms.toml".to_string(),
            value: Some(json!("title = \"Alarms\"\nbind = \"Main.alarm\"\nbind = \"global.EStop\"\n")),
            from: None,
        }],
        false,
    )
    .expect("apply patch");
    assert!(accepted.ok);
    assert!(root.join("alarms.toml").is_file());

    // Validate the patched layout against the live catalog.
    let snapshot = LayoutSnapshot::load(&root).expect("reload layout");
    let catalog = catalog();
    let options = ValidateOptions {
        dry_run: false,
        prune: false,
        retain_runs: 10,
        run_id: Some("2026-08-30T12-00-00Z".to_string()),
    };
    let report = validate(&snapshot, &catalog, &[], &options).expect("validate");
    assert!(report.ok, "unexpected checks: {:?}", report.checks);

    // Lock file lands at the layout root and is byte-stable on re-run.
    let lock_path = root.join(LOCK_FILE);
    assert_eq!(report.lock_path, lock_path);
    let first_bytes = std::fs::read(&lock_path).expect("read lock");
    let report_again = validate(&snapshot, &catalog, &[], &options).expect("revalidate");
    assert_eq!(std::fs::read(&lock_path).expect("reread lock"), first_bytes);
    assert_eq!(report_again.lock.render(), report.lock.render());

    // Evidence run captured the validation artifact.
    let store = EvidenceStore::new(&root);
    assert!(store
        .run_dir("2026-08-30T12-00-00Z")
        .join("validation.json")
        .is_file());

    // Candidates from the same snapshot, ranked by the intent-weighted
    // overall metric.
    let refs = snapshot.binding_refs();
    let candidates = generate_candidates(&refs, &catalog, snapshot.intent_text(), 4);
    assert_eq!(candidates.len(), 4);
    assert_eq!(candidates[0].rank, 1);
    for pair in candidates.windows(2) {
        assert!(pair[0].metrics.overall >= pair[1].metrics.overall);
    }

    // Record the ranked list and screenshot every viewport for the
    // winning candidate, all under one evidence run.
    let run_id = "2026-08-30T12-00-01Z";
    let listing = record_candidates(&store, run_id, &candidates).expect("record candidates");
    assert!(listing.ends_with("candidates.json"));
    let recorded: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&listing).unwrap())
            .expect("parse candidates artifact");
    assert_eq!(recorded["count"], 4);
    assert_eq!(recorded["candidates"][0]["rank"], 1);
    for name in ["desktop", "tablet", "mobile"] {
        let view = viewport(name).expect("viewport");
        let render = render_snapshot(&candidates[0], view);
        assert!(render.svg.starts_with("<svg"));
        let path = store
            .write_screenshot(run_id, name, &render.svg)
            .expect("write screenshot");
        assert!(path.is_file());
    }
    assert_eq!(
        store.run_ids().expect("run ids"),
        vec![
            "2026-08-30T12-00-00Z".to_string(),
            "2026-08-30T12-00-01Z".to_string()
        ]
    );

    std::fs::remove_dir_all(root).ok();
}

#[test]
fn validation_without_a_catalog_downgrades_unknown_bindings() {
    let root = temp_dir("hmi-workbench-pipeline-offline");
    seed_layout(&root);

    let snapshot = LayoutSnapshot::load(&root).expect("load layout");
    let offline = hmi_workbench::catalog::CatalogOutcome::unavailable();
    let report = validate(
        &snapshot,
        &offline,
        &[],
        &ValidateOptions {
            dry_run: true,
            ..ValidateOptions::default()
        },
    )
    .expect("validate offline");

    // Unreachable runtime: unknown bindings warn instead of failing, and
    // a dry run leaves the directory untouched.
    assert!(report.ok);
    assert!(report
        .checks
        .iter()
        .any(|check| check.code == "HMI_VALIDATE_UNKNOWN_BINDING"));
    assert!(!root.join(LOCK_FILE).exists());
    assert!(report.run_id.is_none());

    std::fs::remove_dir_all(root).ok();
}
