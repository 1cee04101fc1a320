//! Sync progress reporting.
//!
//! Reports observable progress during `isync sync` so users see how much
//! of the plan has been applied. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Reading the remote projection and diffing it against `local` chunks.
    Planning { index: String, local: u64 },
    /// Writes applied so far: `done` actions out of `total` non-unchanged ones.
    Executing { index: String, done: u64, total: u64 },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the engine and executor.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync docs  applying  1,234 / 5,000 actions".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Planning { index, local } => {
                format!(
                    "sync {}  planning  {} local chunks\n",
                    index,
                    format_number(*local)
                )
            }
            SyncProgressEvent::Executing { index, done, total } => {
                format!(
                    "sync {}  applying  {} / {} actions\n",
                    index,
                    format_number(*done),
                    format_number(*total)
                )
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_json(event: &SyncProgressEvent) -> serde_json::Value {
    match event {
        SyncProgressEvent::Planning { index, local } => serde_json::json!({
            "event": "progress",
            "index": index,
            "phase": "planning",
            "local": local
        }),
        SyncProgressEvent::Executing { index, done, total } => serde_json::json!({
            "event": "progress",
            "index": index,
            "phase": "executing",
            "n": done,
            "total": total
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn json_event_shape() {
        let v = event_json(&SyncProgressEvent::Executing {
            index: "docs".to_string(),
            done: 3,
            total: 10,
        });
        assert_eq!(v["phase"], "executing");
        assert_eq!(v["n"], 3);
        assert_eq!(v["total"], 10);
    }
}
