//! # index-sync core
//!
//! Pure logic for index-sync: chunk and action models, content
//! fingerprints, the diff planner, and the run report.
//!
//! This crate contains no tokio, HTTP, or filesystem I/O. Everything here
//! is a deterministic function of its inputs, which is what makes a sync
//! run safe to restart at any point: the plan is recomputed from the local
//! corpus and the current remote projection every time.

pub mod fingerprint;
pub mod models;
pub mod plan;
pub mod report;
