//! Fusion/Ranking (spec §4.7): combines a fulltext ranked list and a vector
//! ranked list into one ranking, either by reciprocal-rank fusion or by
//! min-max-normalized weighted blend.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub enum FusionStrategy {
    Rrf { k_rrf: f64 },
    Weighted { weight_text: f64 },
}

/// `fulltext` is ranked by descending BM25 score; `vector` is ranked by
/// ascending distance (closer is better) as HNSW search returns it.
pub fn fuse(
    fulltext: Option<&[(String, f64)]>,
    vector: Option<&[(String, f64)]>,
    strategy: FusionStrategy,
    top_k: usize,
) -> Vec<(String, f64)> {
    match strategy {
        FusionStrategy::Rrf { k_rrf } => rrf(fulltext, vector, k_rrf, top_k),
        FusionStrategy::Weighted { weight_text } => weighted(fulltext, vector, weight_text, top_k),
    }
}

fn rrf(
    fulltext: Option<&[(String, f64)]>,
    vector: Option<&[(String, f64)]>,
    k_rrf: f64,
    top_k: usize,
) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    if let Some(list) = fulltext {
        for (rank, (pk, _)) in list.iter().enumerate() {
            *scores.entry(pk.clone()).or_insert(0.0) += 1.0 / (k_rrf + (rank + 1) as f64);
        }
    }
    if let Some(list) = vector {
        for (rank, (pk, _)) in list.iter().enumerate() {
            *scores.entry(pk.clone()).or_insert(0.0) += 1.0 / (k_rrf + (rank + 1) as f64);
        }
    }
    sort_and_truncate(scores, top_k)
}

fn min_max_normalize_similarity(list: &[(String, f64)], invert_as_distance: bool) -> HashMap<String, f64> {
    if list.is_empty() {
        return HashMap::new();
    }
    let (min, max) = list.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, v)| {
        (lo.min(*v), hi.max(*v))
    });
    let range = max - min;
    list.iter()
        .map(|(pk, v)| {
            let normalized = if range.abs() < f64::EPSILON { 1.0 } else { (v - min) / range };
            let similarity = if invert_as_distance { 1.0 - normalized } else { normalized };
            (pk.clone(), similarity)
        })
        .collect()
}

fn weighted(
    fulltext: Option<&[(String, f64)]>,
    vector: Option<&[(String, f64)]>,
    weight_text: f64,
    top_k: usize,
) -> Vec<(String, f64)> {
    let alpha = weight_text.clamp(0.0, 1.0);
    let text_sim = fulltext.map(|l| min_max_normalize_similarity(l, false)).unwrap_or_default();
    let vec_sim = vector.map(|l| min_max_normalize_similarity(l, true)).unwrap_or_default();

    let mut keys: Vec<&String> = text_sim.keys().chain(vec_sim.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut scores = HashMap::new();
    for pk in keys {
        let t = text_sim.get(pk).copied().unwrap_or(0.0);
        let v = vec_sim.get(pk).copied().unwrap_or(0.0);
        scores.insert(pk.clone(), alpha * t + (1.0 - alpha) * v);
    }
    sort_and_truncate(scores, top_k)
}

fn sort_and_truncate(scores: HashMap<String, f64>, top_k: usize) -> Vec<(String, f64)> {
    let mut out: Vec<(String, f64)> = scores.into_iter().collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    out.truncate(top_k);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_favors_items_ranked_highly_in_both_lists() {
        let text = vec![("a".to_string(), 5.0), ("b".to_string(), 3.0)];
        let vector = vec![("b".to_string(), 0.1), ("a".to_string(), 0.5)];
        let fused = fuse(Some(&text), Some(&vector), FusionStrategy::Rrf { k_rrf: 60.0 }, 10);
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn weighted_fusion_respects_alpha_extremes() {
        let text = vec![("a".to_string(), 10.0), ("b".to_string(), 1.0)];
        let vector = vec![("b".to_string(), 0.0), ("a".to_string(), 1.0)];
        let text_only = fuse(Some(&text), Some(&vector), FusionStrategy::Weighted { weight_text: 1.0 }, 10);
        assert_eq!(text_only[0].0, "a");

        let vector_only = fuse(Some(&text), Some(&vector), FusionStrategy::Weighted { weight_text: 0.0 }, 10);
        assert_eq!(vector_only[0].0, "b");
    }

    #[test]
    fn ties_break_by_pk_ascending() {
        let text = vec![("z".to_string(), 1.0), ("a".to_string(), 1.0)];
        let fused = fuse(Some(&text), None, FusionStrategy::Rrf { k_rrf: 60.0 }, 10);
        assert_eq!(fused[0].0, "a");
    }
}
