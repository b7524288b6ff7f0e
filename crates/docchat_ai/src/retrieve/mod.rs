use std::sync::Arc;

use docchat_core::config::PipelineConfig;
use docchat_core::domain::{round_to, Fragment, SourceCitation};
use docchat_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::store::VectorStore;

/// Context text used when a query found nothing at all.
pub const NO_RELEVANT_DOCUMENTS: &str = "No relevant documents were found.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub fragment: Fragment,
    pub similarity_score: f64,
    /// `similarity_score >= confidence_threshold` at retrieval time.
    pub is_relevant: bool,
}

impl RetrievalResult {
    pub fn source_name(&self) -> &str {
        self.fragment
            .metadata
            .get("source_file")
            .map(String::as_str)
            .unwrap_or(self.fragment.source_id.as_str())
    }
}

/// Scored hits for one query, best first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResponse {
    pub results: Vec<RetrievalResult>,
    pub query: String,
    /// Mean of every returned score, 0.0 with no results.
    pub avg_confidence: f64,
    pub has_relevant_results: bool,
    pub docs_consulted: u32,
}

/// Routine outcome of a search: evidence, or an empty collection/result set.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    Found(RetrievalResponse),
    Empty { query: String },
}

impl RetrievalResponse {
    pub fn empty(query: &str) -> Self {
        Self {
            results: Vec::new(),
            query: query.to_string(),
            avg_confidence: 0.0,
            has_relevant_results: false,
            docs_consulted: 0,
        }
    }

    fn from_hits(query: &str, hits: Vec<(Fragment, f64)>, threshold: f64) -> Self {
        if hits.is_empty() {
            return Self::empty(query);
        }
        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .map(|(fragment, score)| RetrievalResult {
                fragment,
                similarity_score: score,
                is_relevant: score >= threshold,
            })
            .collect();
        let avg_confidence =
            results.iter().map(|r| r.similarity_score).sum::<f64>() / results.len() as f64;
        Self {
            has_relevant_results: results.iter().any(|r| r.is_relevant),
            docs_consulted: results.len() as u32,
            query: query.to_string(),
            avg_confidence,
            results,
        }
    }

    /// Every hit, relevant or not, under a citation header.
    pub fn context_text(&self) -> String {
        if self.results.is_empty() {
            return NO_RELEVANT_DOCUMENTS.to_string();
        }
        self.results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                format!(
                    "[Source {}: {}, fragment {}]\n{}",
                    i + 1,
                    r.source_name(),
                    r.fragment.position_label(),
                    r.fragment.content
                )
            })
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }

    /// Citations for relevant hits only.
    pub fn sources(&self) -> Vec<SourceCitation> {
        self.results
            .iter()
            .filter(|r| r.is_relevant)
            .map(|r| SourceCitation {
                source: r.source_name().to_string(),
                chunk: r.fragment.position_label(),
                relevance: round_to(r.similarity_score, 2),
            })
            .collect()
    }

    pub fn into_outcome(self) -> RetrievalOutcome {
        if self.results.is_empty() {
            RetrievalOutcome::Empty { query: self.query }
        } else {
            RetrievalOutcome::Found(self)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retriever {
    store: Arc<VectorStore>,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Search with `k` (default `cfg.top_k`) and flag hits against `cfg.confidence_threshold`.
    pub fn retrieve(
        &self,
        query: &str,
        k: Option<usize>,
        cfg: &PipelineConfig,
    ) -> Result<RetrievalResponse, AppError> {
        let k = k.unwrap_or(cfg.top_k);
        let hits = self.store.similarity_search(query, k)?;
        let resp = RetrievalResponse::from_hits(query, hits, cfg.confidence_threshold);
        if resp.results.is_empty() {
            tracing::info!(k, "no results for query");
        } else {
            tracing::info!(
                results = resp.results.len(),
                avg_confidence = resp.avg_confidence,
                relevant = resp.has_relevant_results,
                "retrieved"
            );
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn hit(source: &str, i: u32, n: u32, score: f64) -> (Fragment, f64) {
        let mut metadata = BTreeMap::new();
        metadata.insert("source_file".to_string(), source.to_string());
        (
            Fragment {
                content: format!("content {i}"),
                source_id: format!("/docs/{source}"),
                chunk_index: i,
                total_chunks: n,
                start_offset: 0,
                metadata,
            },
            score,
        )
    }

    #[test]
    fn empty_hits_give_marker_and_zero_confidence() {
        let r = RetrievalResponse::from_hits("test", Vec::new(), 0.7);
        assert_eq!(r.docs_consulted, 0);
        assert_eq!(r.avg_confidence, 0.0);
        assert!(!r.has_relevant_results);
        assert_eq!(r.context_text(), NO_RELEVANT_DOCUMENTS);
        assert!(r.sources().is_empty());
        assert_eq!(
            r.into_outcome(),
            RetrievalOutcome::Empty {
                query: "test".to_string()
            }
        );
    }

    #[test]
    fn context_keeps_all_hits_but_citations_only_relevant() {
        let r = RetrievalResponse::from_hits(
            "q",
            vec![hit("a.md", 0, 3, 0.876), hit("b.pdf", 4, 5, 0.5)],
            0.7,
        );
        assert!((r.avg_confidence - 0.688).abs() < 1e-12);
        assert!(r.has_relevant_results);

        let ctx = r.context_text();
        assert_eq!(
            ctx,
            "[Source 1: a.md, fragment 1/3]\ncontent 0\n\n---\n\n[Source 2: b.pdf, fragment 5/5]\ncontent 4"
        );

        let sources = r.sources();
        assert_eq!(
            sources,
            vec![SourceCitation {
                source: "a.md".to_string(),
                chunk: "1/3".to_string(),
                relevance: 0.88,
            }]
        );
        assert!(matches!(r.into_outcome(), RetrievalOutcome::Found(_)));
    }

    #[test]
    fn threshold_is_inclusive() {
        let r = RetrievalResponse::from_hits("q", vec![hit("a.md", 0, 1, 0.7)], 0.7);
        assert!(r.results[0].is_relevant);
    }
}
