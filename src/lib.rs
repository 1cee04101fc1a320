//! # index-sync
//!
//! Incremental synchronization of a search index with a chunked corpus.
//!
//! Each run fingerprints the local chunks, reads the `(chunk_id,
//! fingerprint)` projection of the remote index, and applies only the
//! difference: new and changed chunks are embedded and upserted, removed
//! chunks are deleted, unchanged chunks are never touched. Writes run under
//! bounded concurrency with shared adaptive throttling and per-call retry.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐   ┌─────────────────┐
//! │  corpus  │──▶│  fingerprint │──▶│    plan    │──▶│    executor     │
//! │  (JSONL) │   │   (core)     │   │   (core)   │   │ retry+throttle  │
//! └──────────┘   └──────────────┘   └─────▲──────┘   └───┬─────────┬───┘
//!                                         │              ▼         ▼
//!                                   ┌─────┴──────┐  ┌─────────┐ ┌────────┐
//!                                   │ projection │◀─│  index  │ │embedder│
//!                                   └────────────┘  └─────────┘ └────────┘
//! ```
//!
//! The pure pieces (fingerprint, planner, report) live in
//! `index-sync-core`; everything that performs I/O lives here.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`corpus`] | JSON Lines corpus loader |
//! | [`engine`] | Sync entry point (dry-run / recreate) |
//! | [`executor`] | Bounded concurrent plan execution |
//! | [`projection`] | Remote state reader |
//! | [`retry`] | Backoff policy |
//! | [`throttle`] | Adaptive shared throttle |
//! | [`error`] | Error taxonomy and HTTP classification |
//! | [`remote`] | `RemoteIndex` / `Embedder` traits |
//! | [`search_service`] | Azure AI Search client |
//! | [`embedding`] | OpenAI-compatible embedding client |
//! | [`memory`] | In-process index and embedder |
//! | [`progress`] | Progress reporting |

pub mod config;
pub mod corpus;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod executor;
pub mod memory;
pub mod progress;
pub mod projection;
pub mod remote;
pub mod retry;
pub mod search_service;
pub mod sync_cmd;
pub mod throttle;

pub use index_sync_core::{fingerprint, models, plan, report};
