//! Scripted journey execution against the live runtime.
//!
//! A journey is an ordered list of read/wait/write steps with a total
//! time budget. Write steps re-derive the write-policy decision locally
//! before any network call: a runtime-side policy bug must not let an
//! unauthorized write be reported as a pass. Remote rejections can be
//! expected (negative tests) via `expect_error_code`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::catalog::{canonical_widget_id, slug};
use crate::control::{CancelToken, ControlClientError, ControlTransport};
use crate::error::WorkbenchError;
use crate::evidence::EvidenceStore;
use crate::layout::{LayoutSnapshot, WritePolicy, JOURNEYS_FILE};

const DEFAULT_BUDGET_MS: u64 = 60_000;
const BUDGET_MIN_MS: u64 = 100;
const BUDGET_MAX_MS: u64 = 300_000;
const WAIT_MIN_MS: u64 = 10;
const WAIT_MAX_MS: u64 = 10_000;
const WAIT_SLICE: Duration = Duration::from_millis(10);

pub const FAIL_READONLY_SCHEMA: &str = "HMI_JOURNEY_READONLY_SCHEMA";
pub const FAIL_WRITE_DISABLED: &str = "HMI_JOURNEY_WRITE_DISABLED";
pub const FAIL_ALLOWLIST_EMPTY: &str = "HMI_JOURNEY_ALLOWLIST_EMPTY";
pub const FAIL_NOT_ALLOWED: &str = "HMI_JOURNEY_NOT_ALLOWED";
pub const FAIL_READ: &str = "HMI_JOURNEY_READ_FAILED";
pub const FAIL_WRITE_REJECTED: &str = "HMI_JOURNEY_WRITE_REJECTED";
pub const FAIL_EXPECTED_ERROR: &str = "HMI_JOURNEY_EXPECTED_ERROR";
pub const FAIL_CANCELLED: &str = "HMI_JOURNEY_CANCELLED";
pub const FAIL_BUDGET: &str = "HMI_JOURNEY_BUDGET_EXCEEDED";

/// One scenario step.
#[derive(Debug, Clone, PartialEq)]
pub enum JourneyStep {
    ReadValues {
        paths: Vec<String>,
    },
    Wait {
        duration_ms: u64,
    },
    Write {
        target: String,
        value: serde_json::Value,
        expect_error_code: Option<String>,
    },
}

impl JourneyStep {
    fn action(&self) -> &'static str {
        match self {
            Self::ReadValues { .. } => "read_values",
            Self::Wait { .. } => "wait",
            Self::Write { .. } => "write",
        }
    }
}

/// A named scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct JourneyDefinition {
    pub name: String,
    pub budget_ms: u64,
    pub steps: Vec<JourneyStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
}

/// Outcome of one executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub action: &'static str,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-journey verdict.
#[derive(Debug, Clone, Serialize)]
pub struct JourneyResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub budget_ms: u64,
    pub steps: Vec<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<SmolStr>,
}

/// Everything a journey needs from its surroundings.
pub struct JourneyEnvironment<'a> {
    pub transport: &'a dyn ControlTransport,
    pub policy: &'a WritePolicy,
    /// Runtime schema mode; a read-only schema blocks every write.
    pub schema_read_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct JourneyFileToml {
    #[serde(default, rename = "journey")]
    journeys: Vec<JourneyDefinitionToml>,
}

#[derive(Debug, Clone, Deserialize)]
struct JourneyDefinitionToml {
    name: String,
    budget_ms: Option<u64>,
    #[serde(default, rename = "step")]
    steps: Vec<JourneyStepToml>,
}

#[derive(Debug, Clone, Deserialize)]
struct JourneyStepToml {
    action: String,
    #[serde(default)]
    paths: Vec<String>,
    duration_ms: Option<u64>,
    #[serde(alias = "widget_id")]
    target: Option<String>,
    value: Option<toml::Value>,
    expect_error_code: Option<String>,
}

/// Loads journey definitions from `_journeys.toml` in the snapshot.
///
/// A missing file yields an empty list; a malformed file is an error.
pub fn load_journeys(snapshot: &LayoutSnapshot) -> Result<Vec<JourneyDefinition>, WorkbenchError> {
    let Some(text) = snapshot.journeys_text() else {
        return Ok(Vec::new());
    };
    let parsed: JourneyFileToml =
        toml::from_str(text).map_err(|err| WorkbenchError::InvalidJourney {
            file: SmolStr::new(JOURNEYS_FILE),
            message: SmolStr::new(err.to_string()),
        })?;

    let mut journeys = Vec::with_capacity(parsed.journeys.len());
    for journey in parsed.journeys {
        let mut steps = Vec::with_capacity(journey.steps.len());
        for (index, step) in journey.steps.into_iter().enumerate() {
            steps.push(parse_step(&journey.name, index, step)?);
        }
        journeys.push(JourneyDefinition {
            name: journey.name,
            budget_ms: journey
                .budget_ms
                .unwrap_or(DEFAULT_BUDGET_MS)
                .clamp(BUDGET_MIN_MS, BUDGET_MAX_MS),
            steps,
        });
    }
    Ok(journeys)
}

fn parse_step(
    journey: &str,
    index: usize,
    step: JourneyStepToml,
) -> Result<JourneyStep, WorkbenchError> {
    let invalid = |message: String| WorkbenchError::InvalidJourney {
        file: SmolStr::new(JOURNEYS_FILE),
        message: SmolStr::new(format!("journey '{journey}' step {index}: {message}")),
    };
    match step.action.as_str() {
        "read_values" => Ok(JourneyStep::ReadValues { paths: step.paths }),
        "wait" => {
            let duration_ms = step
                .duration_ms
                .ok_or_else(|| invalid("wait requires duration_ms".to_string()))?;
            Ok(JourneyStep::Wait {
                duration_ms: duration_ms.clamp(WAIT_MIN_MS, WAIT_MAX_MS),
            })
        }
        "write" => {
            let target = step
                .target
                .ok_or_else(|| invalid("write requires a target".to_string()))?;
            let value = step
                .value
                .map(toml_to_json)
                .ok_or_else(|| invalid("write requires a value".to_string()))?;
            Ok(JourneyStep::Write {
                target,
                value,
                expect_error_code: step.expect_error_code,
            })
        }
        other => Err(invalid(format!("unknown action '{other}'"))),
    }
}

fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(text) => serde_json::Value::String(text),
        toml::Value::Integer(number) => serde_json::Value::Number(number.into()),
        toml::Value::Float(number) => serde_json::Number::from_f64(number)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        toml::Value::Boolean(flag) => serde_json::Value::Bool(flag),
        toml::Value::Datetime(datetime) => serde_json::Value::String(datetime.to_string()),
        toml::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .into_iter()
                .map(|(key, item)| (key, toml_to_json(item)))
                .collect(),
        ),
    }
}

/// Runs every journey in order, sharing one cancellation token.
pub fn run_journeys(
    definitions: &[JourneyDefinition],
    env: &JourneyEnvironment<'_>,
    cancel: &CancelToken,
) -> Vec<JourneyResult> {
    definitions
        .iter()
        .map(|definition| run_journey(definition, env, cancel))
        .collect()
}

/// Executes one journey. Steps run strictly in order; the first
/// cancellation stops the journey; the verdict also fails on budget
/// overrun even when every step passed.
pub fn run_journey(
    definition: &JourneyDefinition,
    env: &JourneyEnvironment<'_>,
    cancel: &CancelToken,
) -> JourneyResult {
    let started = Instant::now();
    let budget_ms = definition.budget_ms.clamp(BUDGET_MIN_MS, BUDGET_MAX_MS);
    let mut steps = Vec::with_capacity(definition.steps.len());
    let mut failure_code: Option<SmolStr> = None;

    for (index, step) in definition.steps.iter().enumerate() {
        let step_started = Instant::now();
        let outcome = execute_step(step, env, cancel);
        let duration_ms = step_started.elapsed().as_millis() as u64;
        let (status, code, detail) = match outcome {
            Ok(detail) => (StepStatus::Passed, None, detail),
            Err((code, detail)) => (StepStatus::Failed, Some(code), detail),
        };
        if status == StepStatus::Failed && failure_code.is_none() {
            failure_code = code.clone();
        }
        let cancelled = code.as_deref() == Some(FAIL_CANCELLED);
        steps.push(StepOutcome {
            index,
            action: step.action(),
            status,
            duration_ms,
            failure_code: code,
            detail,
        });
        if cancelled {
            break;
        }
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    let mut passed = steps.iter().all(|step| step.status == StepStatus::Passed);
    if passed && duration_ms > budget_ms {
        passed = false;
        failure_code = Some(SmolStr::new(FAIL_BUDGET));
        warn!(
            journey = definition.name.as_str(),
            duration_ms,
            budget_ms,
            "journey exceeded its budget"
        );
    }
    debug!(journey = definition.name.as_str(), passed, "journey finished");

    JourneyResult {
        name: definition.name.clone(),
        passed,
        duration_ms,
        budget_ms,
        steps,
        failure_code,
    }
}

type StepError = (SmolStr, Option<String>);

fn execute_step(
    step: &JourneyStep,
    env: &JourneyEnvironment<'_>,
    cancel: &CancelToken,
) -> Result<Option<String>, StepError> {
    match step {
        JourneyStep::Wait { duration_ms } => {
            // Clamped here as well as at load time; definitions built in
            // code get the same bounds as ones parsed from TOML.
            let duration_ms = (*duration_ms).clamp(WAIT_MIN_MS, WAIT_MAX_MS);
            let deadline = Instant::now() + Duration::from_millis(duration_ms);
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    return Err((SmolStr::new(FAIL_CANCELLED), None));
                }
                std::thread::sleep(WAIT_SLICE.min(deadline - Instant::now()));
            }
            Ok(None)
        }
        JourneyStep::ReadValues { paths } => {
            let params = serde_json::json!({ "paths": paths });
            match env.transport.request("hmi.values", Some(params), cancel) {
                Ok(_) => Ok(None),
                Err(ControlClientError::Cancelled) => Err((SmolStr::new(FAIL_CANCELLED), None)),
                Err(err) => Err((SmolStr::new(FAIL_READ), Some(err.to_string()))),
            }
        }
        JourneyStep::Write {
            target,
            value,
            expect_error_code,
        } => execute_write(target, value, expect_error_code.as_deref(), env, cancel),
    }
}

fn execute_write(
    target: &str,
    value: &serde_json::Value,
    expect_error_code: Option<&str>,
    env: &JourneyEnvironment<'_>,
    cancel: &CancelToken,
) -> Result<Option<String>, StepError> {
    // Local policy guard, re-derived on purpose: the runtime enforces
    // the same rules, but a pass here must never depend on it.
    if let Err(code) = write_guard(env, target) {
        if expect_error_code.is_some_and(|expected| code.eq_ignore_ascii_case(expected)) {
            return Ok(Some(format!("write blocked locally as expected ({code})")));
        }
        return Err((code, Some(format!("write to '{target}' blocked locally"))));
    }

    let params = serde_json::json!({ "target": target, "value": value });
    match env.transport.request("hmi.write", Some(params), cancel) {
        Ok(_) => {
            if let Some(expected) = expect_error_code {
                return Err((
                    SmolStr::new(FAIL_EXPECTED_ERROR),
                    Some(format!("expected rejection '{expected}' but the write succeeded")),
                ));
            }
            Ok(None)
        }
        Err(ControlClientError::Cancelled) => Err((SmolStr::new(FAIL_CANCELLED), None)),
        Err(ControlClientError::Rejected { message, code }) => {
            if let Some(expected) = expect_error_code {
                if rejection_matches(expected, code.as_deref(), &message) {
                    return Ok(Some(format!("runtime rejected as expected: {message}")));
                }
            }
            Err((SmolStr::new(FAIL_WRITE_REJECTED), Some(message.to_string())))
        }
        Err(err) => Err((SmolStr::new(FAIL_WRITE_REJECTED), Some(err.to_string()))),
    }
}

/// Local write-policy decision; returns the failure code on rejection.
pub fn write_guard(env: &JourneyEnvironment<'_>, target: &str) -> Result<(), SmolStr> {
    if env.schema_read_only {
        return Err(SmolStr::new(FAIL_READONLY_SCHEMA));
    }
    if !env.policy.write_enabled() {
        return Err(SmolStr::new(FAIL_WRITE_DISABLED));
    }
    let allow = env.policy.allowlist();
    if allow.is_empty() {
        return Err(SmolStr::new(FAIL_ALLOWLIST_EMPTY));
    }
    // Allowlist entries may be canonical ids or raw binding paths; the
    // target may be either as well.
    let allowed = allow.contains(target)
        || allow.contains(&canonical_widget_id(target))
        || allow
            .iter()
            .any(|entry| canonical_widget_id(entry) == target);
    if allowed {
        Ok(())
    } else {
        Err(SmolStr::new(FAIL_NOT_ALLOWED))
    }
}

/// Extracts the leading `CODE:` token, compares case-insensitively, and
/// falls back to a substring match on the whole message.
fn rejection_matches(expected: &str, code: Option<&str>, message: &str) -> bool {
    if code.is_some_and(|code| code.eq_ignore_ascii_case(expected)) {
        return true;
    }
    if let Some((head, _)) = message.split_once(':') {
        let head = head.trim();
        if !head.is_empty() && !head.contains(' ') && head.eq_ignore_ascii_case(expected) {
            return true;
        }
    }
    message
        .to_ascii_lowercase()
        .contains(&expected.to_ascii_lowercase())
}

/// Writes `journeys.json` plus one `trace-<scenario>.json` per journey.
pub fn record_journeys(
    store: &EvidenceStore,
    run_id: &str,
    results: &[JourneyResult],
) -> Result<(), WorkbenchError> {
    let summary = serde_json::json!({
        "passed": results.iter().filter(|result| result.passed).count(),
        "failed": results.iter().filter(|result| !result.passed).count(),
        "journeys": results,
    });
    store.write_artifact(run_id, "journeys.json", &summary)?;
    for result in results {
        let name = format!("trace-{}.json", slug(&result.name));
        store.write_artifact(run_id, &name, &serde_json::to_value(result).unwrap_or_default())?;
    }
    Ok(())
}
