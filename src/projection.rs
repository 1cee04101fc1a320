//! Remote state reader.
//!
//! Pulls the complete `chunk_id → fingerprint` projection from the index,
//! one page at a time. Pages are retried and throttled like any other
//! remote call, but the planner cannot work from a partial projection, so
//! a page that still fails after its retries aborts the run.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::error::SyncError;
use crate::remote::RemoteIndex;
use crate::retry::{with_retry, RetryPolicy};
use crate::throttle::ThrottleController;

/// Read every page of the remote projection.
///
/// Entries with an empty `chunk_id` are skipped. If the same id appears on
/// more than one page the later fingerprint wins.
pub async fn fetch_projection(
    index: &dyn RemoteIndex,
    retry: &RetryPolicy,
    throttle: Option<&ThrottleController>,
) -> Result<BTreeMap<String, String>, SyncError> {
    let mut projection = BTreeMap::new();
    let mut seen_tokens: HashSet<String> = HashSet::new();
    let mut token: Option<String> = None;
    let mut page_no = 0usize;

    loop {
        page_no += 1;
        let current = token.clone();
        let page = with_retry("list_projection", retry, throttle, || {
            index.list_projection(current.as_deref())
        })
        .await
        .map_err(|e| e.into_fatal(&format!("reading projection page {}", page_no)))?;

        debug!(page = page_no, entries = page.entries.len(), "projection page");

        for entry in page.entries {
            if entry.chunk_id.trim().is_empty() {
                warn!(page = page_no, "skipping projection entry with empty chunk_id");
                continue;
            }
            projection.insert(entry.chunk_id, entry.fingerprint);
        }

        match page.next_page_token {
            None => break,
            Some(next) => {
                if !seen_tokens.insert(next.clone()) {
                    return Err(SyncError::Fatal(format!(
                        "index returned page token {:?} twice; refusing to loop",
                        next
                    )));
                }
                token = Some(next);
            }
        }
    }

    Ok(projection)
}
