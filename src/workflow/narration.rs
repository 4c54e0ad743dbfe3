//! Machine-parseable progress narration.
//!
//! Every phase and iteration emits one JSON line on stdout so wrapping
//! tooling can follow the loop without scraping log output. Human-facing
//! logging goes through `tracing` separately.

use chrono::Utc;
use serde_json::json;

/// Emits JSON-line progress events.
#[derive(Debug, Clone)]
pub struct Narrator {
    enabled: bool,
}

impl Default for Narrator {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Narrator {
    /// A narrator that emits nothing (used in tests).
    #[must_use]
    pub fn silent() -> Self {
        Self { enabled: false }
    }

    fn emit(&self, event: &str, fields: serde_json::Value) {
        if !self.enabled {
            return;
        }
        let mut object = json!({
            "ts": Utc::now().to_rfc3339(),
            "event": event,
        });
        if let (Some(map), Some(extra)) = (object.as_object_mut(), fields.as_object()) {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }
        println!("{object}");
    }

    /// A workflow phase started or finished.
    pub fn phase(&self, phase: &str, status: &str) {
        self.emit("phase", json!({ "phase": phase, "status": status }));
    }

    /// An iteration completed.
    pub fn iteration(&self, iteration: u32, approved: bool, feedback_chars: usize) {
        self.emit(
            "iteration",
            json!({
                "iteration": iteration,
                "approved": approved,
                "feedback_chars": feedback_chars,
            }),
        );
    }

    /// The loop paused for a human decision.
    pub fn pause(&self, reason: &str) {
        self.emit("pause", json!({ "reason": reason }));
    }

    /// The loop finished.
    pub fn finished(&self, approved: bool, status: &str, message: &str) {
        self.emit(
            "finished",
            json!({ "approved": approved, "status": status, "message": message }),
        );
    }
}
