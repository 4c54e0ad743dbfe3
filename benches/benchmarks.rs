//! Criterion benchmarks for the hot pure paths: reviewer reply parsing and
//! gate evaluation. Both run once per iteration, but replies can be large
//! and the parser does regex extraction over the full text.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tandem::review::{
    evaluate_gates, parse_reviewer_reply, Artifacts, CheckResult, GateConfig, ReviewResult,
    RuntimeEvidence,
};

fn large_reply() -> String {
    let filler = "The implementation looks reasonable overall. ".repeat(200);
    format!(
        "{filler}\n```json\n{{\"approved\": true, \"checks\": [{{\"name\": \"lint\", \
         \"passed\": true}}], \"issues\": []}}\n```\n{filler}"
    )
}

fn approved_result() -> ReviewResult {
    ReviewResult {
        approved: true,
        checks: (0..20)
            .map(|i| CheckResult::pass(format!("check-{i}")))
            .collect(),
        feedback: String::new(),
        issues: Vec::new(),
        artifacts: Artifacts {
            screenshots: vec!["/tmp/a.png".into()],
            ..Default::default()
        },
        target: None,
        runtime: Some(RuntimeEvidence {
            websocket: true,
            session_start: true,
            session_end: true,
            ping_pong_ok: Some(true),
            third_party_connect: true,
            third_party_close_reason: None,
            console_error_count: 0,
        }),
        tool_calls: None,
        reviewer_json_valid: true,
    }
}

fn bench_parse_reviewer_reply(c: &mut Criterion) {
    let reply = large_reply();
    c.bench_function("parse_reviewer_reply_large", |b| {
        b.iter(|| parse_reviewer_reply(black_box(&reply)))
    });
}

fn bench_evaluate_gates(c: &mut Criterion) {
    let config = GateConfig::default();
    c.bench_function("evaluate_gates_20_checks", |b| {
        b.iter(|| evaluate_gates(black_box(approved_result()), black_box(&config)))
    });
}

criterion_group!(benches, bench_parse_reviewer_reply, bench_evaluate_gates);
criterion_main!(benches);
