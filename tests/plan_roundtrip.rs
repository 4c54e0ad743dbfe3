//! Round-trip guarantees for the plan-state markdown rendering.
//!
//! The fixed section headers are a cross-tool contract; task text, current
//! phase, and acceptance criteria must survive render → parse. Phases and
//! decisions are documented-lossy and excluded from the guarantee.

use tandem::plan::render::{parse_plan, render_plan};
use tandem::plan::{PlanStateStore, TaskPlan};
use tempfile::TempDir;

#[test]
fn test_markdown_roundtrip_guarantees() {
    let mut plan = TaskPlan::with_default_phases(
        "migrate the settings page to the new form library",
        vec![
            "all settings persist".into(),
            "no regression in keyboard navigation".into(),
        ],
    );
    plan.record_decision("keep the legacy validation layer for now");
    plan.upsert_error("fix e2e", "settings spec timed out");

    let rendered = render_plan(&plan);
    let parsed = parse_plan(&rendered);

    // Guaranteed fields
    assert_eq!(parsed.task, plan.task);
    assert_eq!(parsed.current_phase, plan.current_phase);
    assert_eq!(parsed.acceptance_criteria, plan.acceptance_criteria);
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].attempts, 1);

    // Documented-lossy fields
    assert!(parsed.phases.is_empty());
    assert!(parsed.decisions.is_empty());
}

#[test]
fn test_fixed_headers_are_stable() {
    let plan = TaskPlan::with_default_phases("any task", vec![]);
    let rendered = render_plan(&plan);

    // Load-bearing parsing contract; changing these needs a versioned
    // migration.
    for header in [
        "## Task",
        "## Current Phase",
        "## Phases",
        "## Acceptance Criteria",
        "## Decisions",
        "## Errors",
    ] {
        assert!(rendered.contains(header), "missing {header}");
    }
}

#[test]
fn test_store_reload_via_markdown_is_partial() {
    let temp = TempDir::new().unwrap();
    let store = PlanStateStore::initialize(
        temp.path(),
        "harden the websocket reconnect logic",
        vec!["reconnects within 5s".into()],
    )
    .unwrap();
    store
        .update_plan(|plan| {
            plan.record_decision("exponential backoff on reconnect");
            plan.upsert_error("fix reconnect test", "flaky under load");
        })
        .unwrap();

    // Simulate losing the authoritative record
    std::fs::remove_file(store.dir().join("state.json")).unwrap();

    let reloaded = PlanStateStore::open(temp.path(), store.session_id())
        .load()
        .unwrap();
    assert_eq!(reloaded.plan.task, "harden the websocket reconnect logic");
    assert_eq!(
        reloaded.plan.acceptance_criteria,
        vec!["reconnects within 5s"]
    );
    assert_eq!(reloaded.plan.errors.len(), 1);
    assert!(reloaded.plan.phases.is_empty());
    assert!(reloaded.plan.decisions.is_empty());
}
