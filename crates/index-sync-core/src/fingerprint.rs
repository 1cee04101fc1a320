//! Content fingerprints for change detection.
//!
//! A fingerprint is a SHA-256 digest over a canonical serialization of the
//! chunk text and every retrieval-relevant metadata field, in a fixed field
//! order. It is the only signal used to decide whether a chunk changed;
//! timestamps and file modification times are never consulted.
//!
//! # Canonical form
//!
//! Each field is written as an 8-byte little-endian length followed by its
//! UTF-8 bytes, so adjacent fields can never be confused (`"ab" + "c"` and
//! `"a" + "bc"` hash differently). The field order is:
//!
//! 1. scheme tag ([`FINGERPRINT_SCHEME`])
//! 2. `text`
//! 3. `doc_path`, `title`, `section_heading`, `description`
//! 4. `ordinal` (decimal)
//! 5. number of `extra` entries, then each key and value in key order
//!
//! # Example
//!
//! ```rust
//! use index_sync_core::fingerprint::fingerprint;
//! use index_sync_core::models::{Chunk, ChunkMetadata};
//!
//! let chunk = Chunk {
//!     chunk_id: "guide#0".to_string(),
//!     text: "Install the CLI.".to_string(),
//!     metadata: ChunkMetadata { doc_path: "guide".to_string(), ..Default::default() },
//! };
//! let fp = fingerprint(&chunk).unwrap();
//! assert_eq!(fp.len(), 64);
//! assert_eq!(fp, fingerprint(&chunk.clone()).unwrap());
//! ```

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Version tag mixed into every digest. Bumping it re-indexes everything.
pub const FINGERPRINT_SCHEME: &str = "isync-fp-v1";

/// Compute the fingerprint of a chunk.
///
/// # Errors
///
/// Returns an error if `chunk_id` is empty or whitespace.
pub fn fingerprint(chunk: &Chunk) -> Result<String> {
    if chunk.chunk_id.trim().is_empty() {
        bail!("chunk_id must not be empty");
    }

    let meta = &chunk.metadata;
    let mut hasher = Sha256::new();
    write_field(&mut hasher, FINGERPRINT_SCHEME.as_bytes());
    write_field(&mut hasher, chunk.text.as_bytes());
    write_field(&mut hasher, meta.doc_path.as_bytes());
    write_field(&mut hasher, meta.title.as_bytes());
    write_field(&mut hasher, meta.section_heading.as_bytes());
    write_field(&mut hasher, meta.description.as_bytes());
    write_field(&mut hasher, meta.ordinal.to_string().as_bytes());

    hasher.update((meta.extra.len() as u64).to_le_bytes());
    for (key, value) in &meta.extra {
        write_field(&mut hasher, key.as_bytes());
        write_field(&mut hasher, value.as_bytes());
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint every chunk, keyed by `chunk_id`.
///
/// When the same id appears more than once the last occurrence wins, the
/// same way the corpus loader resolves duplicates.
pub fn fingerprint_map(chunks: &[Chunk]) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for chunk in chunks {
        map.insert(chunk.chunk_id.clone(), fingerprint(chunk)?);
    }
    Ok(map)
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn sample() -> Chunk {
        let mut extra = BTreeMap::new();
        extra.insert("product".to_string(), "agents".to_string());
        Chunk {
            chunk_id: "cXVpY2tzdGFydCMw".to_string(),
            text: "Create a project, then deploy a model.".to_string(),
            metadata: ChunkMetadata {
                doc_path: "quickstart".to_string(),
                title: "Quickstart".to_string(),
                section_heading: "Deploy".to_string(),
                description: "Get started fast".to_string(),
                ordinal: 3,
                extra,
            },
        }
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(fingerprint(&sample()).unwrap(), fingerprint(&sample()).unwrap());
    }

    #[test]
    fn test_hex_sha256_shape() {
        let fp = fingerprint(&sample()).unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_empty_chunk_id_rejected() {
        let mut chunk = sample();
        chunk.chunk_id = "  ".to_string();
        assert!(fingerprint(&chunk).is_err());
    }

    #[test]
    fn test_chunk_id_not_part_of_digest() {
        let mut other = sample();
        other.chunk_id = "another-id".to_string();
        assert_eq!(fingerprint(&sample()).unwrap(), fingerprint(&other).unwrap());
    }

    #[test]
    fn test_every_field_changes_fingerprint() {
        let base = fingerprint(&sample()).unwrap();
        let mutations: [fn(&mut Chunk); 8] = [
            |c| c.text.push('!'),
            |c| c.metadata.doc_path.push_str("-v2"),
            |c| c.metadata.title = "Quick start".to_string(),
            |c| c.metadata.section_heading.clear(),
            |c| c.metadata.description.push(' '),
            |c| c.metadata.ordinal += 1,
            |c| {
                c.metadata
                    .extra
                    .insert("product".to_string(), "models".to_string());
            },
            |c| {
                c.metadata
                    .extra
                    .insert("audience".to_string(), "admins".to_string());
            },
        ];
        for (i, mutate) in mutations.iter().enumerate() {
            let mut chunk = sample();
            mutate(&mut chunk);
            assert_ne!(base, fingerprint(&chunk).unwrap(), "mutation {} kept fingerprint", i);
        }
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let mut a = sample();
        a.metadata.title = "ab".to_string();
        a.metadata.section_heading = "c".to_string();
        let mut b = sample();
        b.metadata.title = "a".to_string();
        b.metadata.section_heading = "bc".to_string();
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_fingerprint_map_last_duplicate_wins() {
        let first = sample();
        let mut second = sample();
        second.text = "Different body.".to_string();
        let map = fingerprint_map(&[first, second.clone()]).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[&second.chunk_id], fingerprint(&second).unwrap());
    }
}
