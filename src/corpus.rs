//! JSON Lines corpus loader.
//!
//! Each non-blank line is one chunk:
//!
//! ```json
//! {"doc_path": "quickstart", "ordinal": 0, "title": "Quickstart",
//!  "section_heading": "Install", "text": "Install the CLI..."}
//! ```
//!
//! `text` may also be spelled `content`. When `chunk_id` is missing it is
//! derived from `doc_path` and `ordinal` with [`chunk_key`]; when `ordinal`
//! is missing it is the chunk's position among earlier lines with the same
//! `doc_path`. Ids never depend on chunk content.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use index_sync_core::models::{Chunk, ChunkMetadata};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct CorpusLine {
    #[serde(default)]
    chunk_id: Option<String>,
    #[serde(alias = "content")]
    text: String,
    doc_path: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    section_heading: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    ordinal: Option<u32>,
    #[serde(default)]
    extra: BTreeMap<String, String>,
}

/// Encode an arbitrary string as a search-index document key.
///
/// Unpadded URL-safe base64 contains only letters, digits, `-` and `_`,
/// which every supported index accepts as a key.
pub fn encode_search_key(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Stable chunk id for the `ordinal`-th chunk of `doc_path`.
pub fn chunk_key(doc_path: &str, ordinal: u32) -> String {
    encode_search_key(&format!("{}#{}", doc_path, ordinal))
}

/// Load every chunk from a JSON Lines file.
pub fn load_corpus(path: &Path) -> Result<Vec<Chunk>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    parse_corpus(&content).with_context(|| format!("Invalid corpus file: {}", path.display()))
}

/// Parse JSON Lines corpus text.
pub fn parse_corpus(content: &str) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    let mut next_ordinal: HashMap<String, u32> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: CorpusLine = serde_json::from_str(line)
            .with_context(|| format!("line {}: malformed chunk record", line_no))?;

        if parsed.doc_path.trim().is_empty() {
            bail!("line {}: doc_path must not be empty", line_no);
        }

        let counter = next_ordinal.entry(parsed.doc_path.clone()).or_insert(0);
        let ordinal = parsed.ordinal.unwrap_or(*counter);
        *counter = ordinal.saturating_add(1);

        let chunk_id = match parsed.chunk_id {
            Some(id) if !id.trim().is_empty() => id,
            Some(_) => bail!("line {}: chunk_id must not be blank", line_no),
            None => chunk_key(&parsed.doc_path, ordinal),
        };

        if !seen.insert(chunk_id.clone()) {
            warn!(line = line_no, chunk_id = %chunk_id, "duplicate chunk_id, later line wins");
        }

        chunks.push(Chunk {
            chunk_id,
            text: parsed.text,
            metadata: ChunkMetadata {
                doc_path: parsed.doc_path,
                title: parsed.title,
                section_heading: parsed.section_heading,
                description: parsed.description,
                ordinal,
                extra: parsed.extra,
            },
        });
    }

    Ok(chunks)
}
