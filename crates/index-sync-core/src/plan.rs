//! Diff planner: local fingerprints versus the remote projection.
//!
//! The planner is a pure function of its two inputs. It never looks at a
//! previous run, so a crashed or partially applied sync recovers by simply
//! running again against the current remote state.
//!
//! # Rules
//!
//! | Local | Remote | Action |
//! |-------|--------|--------|
//! | present | absent | `New` |
//! | present | same fingerprint | `Unchanged` |
//! | present | different fingerprint | `Changed` |
//! | absent | present | `Deleted` |
//!
//! A local chunk with an empty fingerprint that already exists remotely is
//! always `Changed`, forcing a re-index instead of silently matching an
//! equally empty remote value.
//!
//! Actions are emitted in lexicographic `chunk_id` order.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::fingerprint::fingerprint;
use crate::models::{ActionKind, Chunk, SyncAction};
use crate::report::ActionCounts;

/// The classified, ordered output of the planner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
}

impl SyncPlan {
    pub fn counts(&self) -> ActionCounts {
        let mut counts = ActionCounts::default();
        for action in &self.actions {
            counts.record(action.kind);
        }
        counts
    }

    /// Actions that need an embedding and an upsert (`New` and `Changed`).
    pub fn upserts(&self) -> impl Iterator<Item = &SyncAction> {
        self.actions.iter().filter(|a| a.kind.is_upsert())
    }

    pub fn deletes(&self) -> impl Iterator<Item = &SyncAction> {
        self.actions
            .iter()
            .filter(|a| a.kind == ActionKind::Deleted)
    }

    /// Number of actions that perform network writes.
    pub fn pending_writes(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.kind != ActionKind::Unchanged)
            .count()
    }

    pub fn is_noop(&self) -> bool {
        self.pending_writes() == 0
    }

    pub fn kind_of(&self, chunk_id: &str) -> Option<ActionKind> {
        self.actions
            .binary_search_by(|a| a.chunk_id.as_str().cmp(chunk_id))
            .ok()
            .map(|i| self.actions[i].kind)
    }
}

/// Classify every chunk id present in either map.
///
/// Both inputs map `chunk_id` to fingerprint. The returned actions carry
/// fingerprints but no chunk payloads.
pub fn plan(local: &BTreeMap<String, String>, remote: &BTreeMap<String, String>) -> SyncPlan {
    let ids: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();

    let actions = ids
        .into_iter()
        .map(|id| {
            let local_fp = local.get(id);
            let remote_fp = remote.get(id);
            let kind = match (local_fp, remote_fp) {
                (Some(_), None) => ActionKind::New,
                (Some(l), Some(_)) if l.is_empty() => ActionKind::Changed,
                (Some(l), Some(r)) if l == r => ActionKind::Unchanged,
                (Some(_), Some(_)) => ActionKind::Changed,
                (None, _) => ActionKind::Deleted,
            };
            SyncAction {
                chunk_id: id.clone(),
                kind,
                fingerprint: local_fp.cloned(),
                remote_fingerprint: remote_fp.cloned(),
                chunk: None,
            }
        })
        .collect();

    SyncPlan { actions }
}

/// Fingerprint `chunks` and plan them against `remote`.
///
/// Upsert actions carry the chunk payload so the executor can embed and
/// write it. Duplicate ids resolve to the last occurrence.
pub fn plan_chunks(chunks: &[Chunk], remote: &BTreeMap<String, String>) -> Result<SyncPlan> {
    let mut local = BTreeMap::new();
    let mut by_id: BTreeMap<&str, &Chunk> = BTreeMap::new();
    for chunk in chunks {
        local.insert(chunk.chunk_id.clone(), fingerprint(chunk)?);
        by_id.insert(chunk.chunk_id.as_str(), chunk);
    }

    let mut planned = plan(&local, remote);
    for action in planned.actions.iter_mut().filter(|a| a.kind.is_upsert()) {
        action.chunk = by_id.get(action.chunk_id.as_str()).map(|c| (*c).clone());
    }
    Ok(planned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                doc_path: "docs/page".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_reference_scenario() {
        let local = map(&[("A", "hashA"), ("B", "hashB2"), ("C", "hashC")]);
        let remote = map(&[("A", "hashA"), ("B", "hashB1"), ("D", "hashD")]);
        let p = plan(&local, &remote);

        assert_eq!(p.kind_of("A"), Some(ActionKind::Unchanged));
        assert_eq!(p.kind_of("B"), Some(ActionKind::Changed));
        assert_eq!(p.kind_of("C"), Some(ActionKind::New));
        assert_eq!(p.kind_of("D"), Some(ActionKind::Deleted));

        let counts = p.counts();
        assert_eq!(counts.new, 1);
        assert_eq!(counts.changed, 1);
        assert_eq!(counts.unchanged, 1);
        assert_eq!(counts.deleted, 1);
        assert_eq!(p.pending_writes(), 3);
    }

    #[test]
    fn test_order_is_lexicographic() {
        let local = map(&[("zeta", "1"), ("alpha", "2")]);
        let remote = map(&[("mid", "3"), ("beta", "4")]);
        let planned = plan(&local, &remote);
        let ids: Vec<&str> = planned
            .actions
            .iter()
            .map(|a| a.chunk_id.as_str())
            .collect();
        assert_eq!(ids, vec!["alpha", "beta", "mid", "zeta"]);
    }

    #[test]
    fn test_empty_local_fingerprint_is_changed() {
        let local = map(&[("A", "")]);
        let remote = map(&[("A", "")]);
        assert_eq!(plan(&local, &remote).kind_of("A"), Some(ActionKind::Changed));

        let fresh = plan(&local, &BTreeMap::new());
        assert_eq!(fresh.kind_of("A"), Some(ActionKind::New));
    }

    #[test]
    fn test_identical_sides_are_noop() {
        let state = map(&[("A", "1"), ("B", "2"), ("C", "3")]);
        let p = plan(&state, &state);
        assert!(p.is_noop());
        assert_eq!(p.counts().unchanged, 3);
    }

    #[test]
    fn test_every_remote_only_id_deleted_once() {
        let local = map(&[("keep", "k")]);
        let remote = map(&[("keep", "k"), ("gone-1", "x"), ("gone-2", "y"), ("gone-3", "z")]);
        let p = plan(&local, &remote);
        let deleted: Vec<&str> = p.deletes().map(|a| a.chunk_id.as_str()).collect();
        assert_eq!(deleted, vec!["gone-1", "gone-2", "gone-3"]);
    }

    #[test]
    fn test_empty_remote_makes_everything_new() {
        let local = map(&[("A", "1"), ("B", "2")]);
        let p = plan(&local, &BTreeMap::new());
        assert!(p.actions.iter().all(|a| a.kind == ActionKind::New));
        assert_eq!(p.deletes().count(), 0);
    }

    #[test]
    fn test_plan_chunks_attaches_payloads() {
        let chunks = vec![chunk("a", "first"), chunk("b", "second")];
        let remote_fp = fingerprint(&chunks[0]).unwrap();
        let remote = map(&[("a", remote_fp.as_str()), ("z", "old")]);

        let p = plan_chunks(&chunks, &remote).unwrap();
        assert_eq!(p.kind_of("a"), Some(ActionKind::Unchanged));
        assert_eq!(p.kind_of("b"), Some(ActionKind::New));
        assert_eq!(p.kind_of("z"), Some(ActionKind::Deleted));

        for action in &p.actions {
            assert_eq!(action.chunk.is_some(), action.kind.is_upsert());
        }
        let b = p.upserts().next().unwrap();
        assert_eq!(b.chunk.as_ref().unwrap().text, "second");
        assert_eq!(b.fingerprint.as_deref(), Some(fingerprint(&chunks[1]).unwrap().as_str()));
    }

    #[test]
    fn test_second_plan_after_apply_is_noop() {
        let chunks = vec![chunk("a", "one"), chunk("b", "two"), chunk("c", "three")];
        let first = plan_chunks(&chunks, &BTreeMap::new()).unwrap();

        // Applying the plan leaves the remote holding exactly the local fingerprints.
        let applied: BTreeMap<String, String> = first
            .upserts()
            .map(|a| (a.chunk_id.clone(), a.fingerprint.clone().unwrap()))
            .collect();

        let second = plan_chunks(&chunks, &applied).unwrap();
        assert!(second.is_noop());
    }

    #[test]
    fn test_plan_chunks_rejects_empty_id() {
        assert!(plan_chunks(&[chunk("", "x")], &BTreeMap::new()).is_err());
    }
}
