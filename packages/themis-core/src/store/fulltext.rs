//! Fulltext index maintenance and BM25 scoring (spec §4.4, §4.7): a classic
//! inverted index (postings + term frequencies + document lengths) backing
//! the ranking the fusion module blends with vector search.

use crate::error::Result;
use crate::keys;
use crate::kv::{KvEngine, WriteOp};
use crate::store::entity_store::UndoSink;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct FulltextMeta {
    pub doc_count: u64,
    pub total_doc_len: u64,
}

impl FulltextMeta {
    pub fn avg_doc_len(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.total_doc_len as f64 / self.doc_count as f64
        }
    }
}

/// Lowercased word tokens (spec §4.7 "BM25 over tokenized text").
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

fn term_freqs(tokens: &[String]) -> BTreeMap<String, u32> {
    let mut freqs = BTreeMap::new();
    for t in tokens {
        *freqs.entry(t.clone()).or_insert(0) += 1;
    }
    freqs
}

fn read_meta(engine: &dyn KvEngine, table: &str, column: &str) -> Result<FulltextMeta> {
    match engine.get(&keys::fulltext_meta_key(table, column))? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
        None => Ok(FulltextMeta::default()),
    }
}

/// Diffs a document's indexed text between its prior and next state,
/// appending the necessary posting/term-freq/doc-length/meta writes to
/// `ops` and recording every pre-image into `undo`. Either side may be
/// `None` (covering insert and delete).
#[allow(clippy::too_many_arguments)]
pub fn diff(
    engine: &dyn KvEngine,
    table: &str,
    column: &str,
    pk: &str,
    old_text: Option<&str>,
    new_text: Option<&str>,
    ops: &mut Vec<WriteOp>,
    undo: &mut dyn UndoSink,
) -> Result<()> {
    if old_text == new_text {
        return Ok(());
    }
    let old_tokens = old_text.map(tokenize).unwrap_or_default();
    let new_tokens = new_text.map(tokenize).unwrap_or_default();
    let old_freqs = term_freqs(&old_tokens);
    let new_freqs = term_freqs(&new_tokens);

    let mut meta = read_meta(engine, table, column)?;

    for (token, _) in old_freqs.iter() {
        if !new_freqs.contains_key(token) {
            let posting = keys::fulltext_posting_key(table, column, token, pk);
            undo.record(posting.clone(), Some(Vec::new()));
            ops.push(WriteOp::Delete(posting));
            let tf_key = keys::fulltext_termfreq_key(table, column, token, pk);
            undo.record(tf_key.clone(), Some(Vec::new()));
            ops.push(WriteOp::Delete(tf_key));
        }
    }
    for (token, freq) in new_freqs.iter() {
        if old_freqs.get(token) != Some(freq) {
            let posting = keys::fulltext_posting_key(table, column, token, pk);
            undo.record(posting.clone(), None);
            ops.push(WriteOp::Put(posting, Vec::new()));
            let tf_key = keys::fulltext_termfreq_key(table, column, token, pk);
            undo.record(tf_key.clone(), None);
            ops.push(WriteOp::Put(tf_key, freq.to_be_bytes().to_vec()));
        }
    }

    let doclen_key = keys::fulltext_doclen_key(table, column, pk);
    if old_text.is_some() {
        meta.doc_count = meta.doc_count.saturating_sub(1);
        meta.total_doc_len = meta.total_doc_len.saturating_sub(old_tokens.len() as u64);
        undo.record(doclen_key.clone(), Some(Vec::new()));
        ops.push(WriteOp::Delete(doclen_key.clone()));
    }
    if new_text.is_some() {
        meta.doc_count += 1;
        meta.total_doc_len += new_tokens.len() as u64;
        undo.record(doclen_key.clone(), None);
        ops.push(WriteOp::Put(doclen_key, (new_tokens.len() as u64).to_be_bytes().to_vec()));
    }

    let meta_key = keys::fulltext_meta_key(table, column);
    let meta_bytes = serde_json::to_vec(&meta)
        .map_err(|e| crate::error::ThemisError::Internal(format!("failed to encode fulltext meta: {e}")))?;
    undo.record(meta_key.clone(), None);
    ops.push(WriteOp::Put(meta_key, meta_bytes));

    Ok(())
}

/// BM25-ranked search over a fulltext index (spec §4.7). `k1`/`b` are the
/// standard Okapi BM25 tunables.
pub fn search(
    engine: &dyn KvEngine,
    table: &str,
    column: &str,
    query: &str,
    top_k: usize,
    k1: f64,
    b: f64,
) -> Result<Vec<(String, f64)>> {
    let meta = read_meta(engine, table, column)?;
    if meta.doc_count == 0 {
        return Ok(Vec::new());
    }
    let avg_len = meta.avg_doc_len();
    let query_tokens: Vec<String> = tokenize(query).into_iter().collect::<std::collections::HashSet<_>>().into_iter().collect();

    let mut scores: HashMap<String, f64> = HashMap::new();
    for token in &query_tokens {
        let prefix = keys::fulltext_token_prefix(table, column, token);
        let postings = engine.scan_prefix(&prefix)?;
        let df = postings.len() as f64;
        if df == 0.0 {
            continue;
        }
        let idf = ((meta.doc_count as f64 - df + 0.5) / (df + 0.5) + 1.0).ln();
        for (key, _) in postings {
            let unescaped = keys::unescape_bytes(&key[prefix.len()..]);
            let pk = String::from_utf8_lossy(&unescaped).into_owned();
            let tf = engine
                .get(&keys::fulltext_termfreq_key(table, column, token, &pk))?
                .and_then(|v| v.try_into().ok())
                .map(u32::from_be_bytes)
                .unwrap_or(1) as f64;
            let doc_len = engine
                .get(&keys::fulltext_doclen_key(table, column, &pk))?
                .and_then(|v| v.try_into().ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0) as f64;
            let denom = tf + k1 * (1.0 - b + b * doc_len / avg_len.max(1.0));
            let score = idf * (tf * (k1 + 1.0)) / denom.max(f64::EPSILON);
            *scores.entry(pk).or_insert(0.0) += score;
        }
    }

    let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::SledEngine;
    use crate::store::entity_store::NullUndoSink;

    #[test]
    fn search_ranks_documents_with_more_query_term_occurrences_higher() {
        let engine = SledEngine::open_temp().unwrap();
        let mut ops = Vec::new();
        diff(&engine, "docs", "body", "d1", None, Some("the quick brown fox"), &mut ops, &mut NullUndoSink).unwrap();
        diff(&engine, "docs", "body", "d2", None, Some("the quick quick quick fox jumps"), &mut ops, &mut NullUndoSink).unwrap();
        engine.write_batch(ops).unwrap();

        let results = search(&engine, "docs", "body", "quick fox", 10, 1.2, 0.75).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "d2");
    }

    #[test]
    fn deleting_a_document_removes_its_postings() {
        let engine = SledEngine::open_temp().unwrap();
        let mut ops = Vec::new();
        diff(&engine, "docs", "body", "d1", None, Some("alpha beta"), &mut ops, &mut NullUndoSink).unwrap();
        engine.write_batch(ops).unwrap();

        let mut ops = Vec::new();
        diff(&engine, "docs", "body", "d1", Some("alpha beta"), None, &mut ops, &mut NullUndoSink).unwrap();
        engine.write_batch(ops).unwrap();

        let results = search(&engine, "docs", "body", "alpha", 10, 1.2, 0.75).unwrap();
        assert!(results.is_empty());
    }
}
