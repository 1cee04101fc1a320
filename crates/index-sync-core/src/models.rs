//! Core data models shared by the planner, executor, and report.
//!
//! A [`Chunk`] is the unit of indexing. Its `chunk_id` is assigned by the
//! corpus producer from the source document path and ordinal position and
//! must stay stable across runs; it is never derived from content.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Retrieval-relevant metadata attached to a chunk.
///
/// Every field here participates in the fingerprint, so a change to any of
/// them re-indexes the chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc_path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub section_heading: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ordinal: u32,
    /// Additional string fields stored alongside the chunk in the index.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// A unit of text plus metadata, indexed and fingerprinted independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// The narrow remote view of one indexed chunk: identity and fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub chunk_id: String,
    pub fingerprint: String,
}

/// Classification of a chunk id after diffing local against remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Unchanged,
    New,
    Changed,
    Deleted,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Unchanged => "unchanged",
            ActionKind::New => "new",
            ActionKind::Changed => "changed",
            ActionKind::Deleted => "deleted",
        }
    }

    /// `New` and `Changed` actions require an embedding and an upsert.
    pub fn is_upsert(&self) -> bool {
        matches!(self, ActionKind::New | ActionKind::Changed)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a sync plan.
///
/// Upsert actions produced by [`plan_chunks`](crate::plan::plan_chunks)
/// carry the chunk payload; actions produced by the bare
/// [`plan`](crate::plan::plan) function only carry fingerprints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAction {
    pub chunk_id: String,
    pub kind: ActionKind,
    /// Local fingerprint (absent for `Deleted`).
    pub fingerprint: Option<String>,
    /// Fingerprint currently stored remotely (absent for `New`).
    pub remote_fingerprint: Option<String>,
    pub chunk: Option<Chunk>,
}

/// Lifecycle of a single action while the executor runs it.
///
/// `Pending` is initial; `Succeeded` and `Failed` are terminal. `Retrying`
/// is entered once per transient failure that will be retried and leads
/// back to `InFlight` when the next attempt starts. A failure on the last
/// attempt goes straight from `InFlight` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Pending,
    InFlight,
    Retrying,
    Succeeded,
    Failed,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionState::Succeeded | ActionState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ActionState) -> bool {
        use ActionState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (Pending, Failed)
                | (InFlight, Succeeded)
                | (InFlight, Retrying)
                | (InFlight, Failed)
                | (Retrying, InFlight)
        )
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionState::Pending => "pending",
            ActionState::InFlight => "in-flight",
            ActionState::Retrying => "retrying",
            ActionState::Succeeded => "succeeded",
            ActionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        let all = [
            ActionState::Pending,
            ActionState::InFlight,
            ActionState::Retrying,
            ActionState::Succeeded,
            ActionState::Failed,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn retrying_returns_to_in_flight() {
        assert!(ActionState::InFlight.can_transition_to(ActionState::Retrying));
        assert!(ActionState::Retrying.can_transition_to(ActionState::InFlight));
        assert!(!ActionState::Retrying.can_transition_to(ActionState::Succeeded));
    }

    #[test]
    fn action_kind_serializes_lowercase() {
        let json = serde_json::to_string(&ActionKind::Changed).unwrap();
        assert_eq!(json, "\"changed\"");
        assert!(ActionKind::New.is_upsert());
        assert!(!ActionKind::Deleted.is_upsert());
    }
}
