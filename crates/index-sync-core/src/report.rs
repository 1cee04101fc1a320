//! Run report: what a sync run planned, what it wrote, and what failed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::ActionKind;

/// Number of chunk ids per action kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl ActionCounts {
    pub fn record(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::New => self.new += 1,
            ActionKind::Changed => self.changed += 1,
            ActionKind::Unchanged => self.unchanged += 1,
            ActionKind::Deleted => self.deleted += 1,
        }
    }

    pub fn upserts(&self) -> usize {
        self.new + self.changed
    }

    pub fn total(&self) -> usize {
        self.new + self.changed + self.unchanged + self.deleted
    }
}

/// A chunk whose action failed permanently, with the last error seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedChunk {
    pub chunk_id: String,
    pub action: ActionKind,
    pub reason: String,
}

/// One planned action, as listed in dry-run output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub chunk_id: String,
    pub action: ActionKind,
}

/// Summary of one sync run, produced once at the end of the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub dry_run: bool,
    pub recreate: bool,
    /// Classification counts from the plan.
    pub counts: ActionCounts,
    /// Chunks actually written to the index.
    pub upserted: usize,
    /// Chunk ids actually removed from the index.
    pub removed: usize,
    pub failed: Vec<FailedChunk>,
    pub duration_ms: u64,
    /// Every planned action except `Unchanged`; only filled for dry runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<PlanEntry>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn set_duration(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Human-readable multi-line summary for the CLI.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let header = if self.dry_run { "sync (dry-run)" } else { "sync" };
        out.push_str(header);
        out.push('\n');
        out.push_str(&format!("  run: {}\n", self.run_id));
        if self.recreate {
            out.push_str("  mode: recreate\n");
        }
        out.push_str(&format!("  new: {}\n", self.counts.new));
        out.push_str(&format!("  changed: {}\n", self.counts.changed));
        out.push_str(&format!("  unchanged: {}\n", self.counts.unchanged));
        out.push_str(&format!("  deleted: {}\n", self.counts.deleted));
        if !self.dry_run {
            out.push_str(&format!("  upserted: {}\n", self.upserted));
            out.push_str(&format!("  removed: {}\n", self.removed));
        }
        out.push_str(&format!("  failed: {}\n", self.failed.len()));
        for failure in &self.failed {
            out.push_str(&format!(
                "    {} ({}): {}\n",
                failure.chunk_id, failure.action, failure.reason
            ));
        }
        out.push_str(&format!(
            "  duration: {:.1}s\n",
            self.duration_ms as f64 / 1000.0
        ));
        out
    }
}
