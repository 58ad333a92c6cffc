//! JSONL dump reader for bulk loads.
//!
//! One object per line: `{"item_id": 42, "payload": {...}}`. `payload` is the
//! source's native shape, exactly what `fetch_one` would have produced.
//! Unreadable lines are logged and counted, never fatal.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use pricefeed_rust_core::types::{ItemId, RawRecord};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

#[derive(Debug, Deserialize)]
struct DumpLine {
    item_id: ItemId,
    payload: Value,
}

/// Parse one dump line into a raw record. Blank lines yield `None`.
pub fn parse_line(
    line: &str,
    source_id: &str,
    observed_at: DateTime<Utc>,
) -> Option<Result<RawRecord, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str::<DumpLine>(line).map(|dump| RawRecord {
        item_id: dump.item_id,
        source_id: source_id.to_string(),
        observed_at,
        payload: dump.payload,
    }))
}

/// Stream of raw records read line by line from `reader`.
///
/// Lines that fail to parse, and read errors, bump `rejected` and are skipped.
/// A read error ends the stream.
pub fn record_stream<R>(
    reader: R,
    source_id: String,
    observed_at: DateTime<Utc>,
    rejected: Arc<AtomicU64>,
) -> impl Stream<Item = RawRecord>
where
    R: AsyncBufRead + Unpin,
{
    let lines = reader.lines();
    stream::unfold((lines, 0u64), move |(mut lines, mut line_no)| {
        let source_id = source_id.clone();
        let rejected = rejected.clone();
        async move {
            loop {
                line_no += 1;
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => return None,
                    Err(e) => {
                        warn!("{}: read error at line {}: {}", source_id, line_no, e);
                        rejected.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }
                };
                match parse_line(&line, &source_id, observed_at) {
                    None => continue,
                    Some(Ok(record)) => return Some((record, (lines, line_no))),
                    Some(Err(e)) => {
                        warn!("{}: skipping line {}: {}", source_id, line_no, e);
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    })
}
