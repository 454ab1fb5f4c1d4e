//! Citation markers.
//!
//! Context passages are tagged `[chunk:<id>]`. The model is asked to repeat
//! those markers next to the claims they support; this module pulls them back
//! out of the answer and reconciles them with what was actually retrieved.

use std::collections::HashSet;

use crate::models::RetrievalResult;

const OPEN: &str = "[chunk:";

/// The marker for a chunk id.
pub fn marker(chunk_id: &str) -> String {
    format!("{OPEN}{chunk_id}]")
}

/// Every `[chunk:<id>]` id in `text`, in order of first appearance, without
/// duplicates. Empty ids and unterminated markers are ignored.
pub fn parse_citations(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(OPEN) {
        rest = &rest[pos + OPEN.len()..];
        let Some(close) = rest.find(']') else {
            break;
        };
        let id = rest[..close].trim();
        // A nested "[chunk:" means the first marker was never closed.
        if !id.is_empty() && !id.contains('[') && seen.insert(id.to_string()) {
            out.push(id.to_string());
        }
        if id.contains('[') {
            continue;
        }
        rest = &rest[close + 1..];
    }
    out
}

/// Cited chunk ids for an answer.
///
/// Only ids that were retrieved for this question count. If the answer
/// cites none of them, every retrieved chunk id is returned in rank order.
pub fn resolve_citations(answer: &str, retrieval: &RetrievalResult) -> Vec<String> {
    let cited: Vec<String> = parse_citations(answer)
        .into_iter()
        .filter(|id| retrieval.find(id).is_some())
        .collect();
    if cited.is_empty() {
        retrieval.chunk_ids()
    } else {
        cited
    }
}
