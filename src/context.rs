//! Context Assembler
//!
//! Builds the grounding context for one question: similar worked examples,
//! related DDL and documentation. Retrieval for the three record kinds runs
//! concurrently. A source that is down only empties its own slot.

use crate::config::{AssistantConfig, MAX_CONTEXT_EXAMPLES};
use crate::error::StoreError;
use crate::store::{
    DocumentationFact, RecordKind, RetrievedMatch, SchemaFact, SimilarityStore, TrainingExample,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-kind bounds on retrieved context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub examples: usize,
    pub ddl: usize,
    pub docs: usize,
    /// Character budget shared by DDL and documentation after examples.
    pub char_budget: Option<usize>,
}

impl ContextLimits {
    pub fn new(examples: usize, ddl: usize, docs: usize) -> Self {
        Self {
            examples: examples.clamp(1, MAX_CONTEXT_EXAMPLES),
            ddl: ddl.max(1),
            docs: docs.max(1),
            char_budget: None,
        }
    }

    pub fn with_char_budget(mut self, budget: usize) -> Self {
        self.char_budget = Some(budget);
        self
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        Self::new(config.examples_limit, config.ddl_limit, config.docs_limit)
            .with_char_budget(config.context_char_budget())
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self::new(MAX_CONTEXT_EXAMPLES, 5, 5)
    }
}

/// Grounding context rendered into the generation prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    /// Highest similarity first, at most five.
    pub similar_examples: Vec<TrainingExample>,
    pub related_ddl: Vec<SchemaFact>,
    pub related_docs: Vec<DocumentationFact>,
}

impl PromptContext {
    pub fn is_empty(&self) -> bool {
        self.similar_examples.is_empty() && self.related_ddl.is_empty() && self.related_docs.is_empty()
    }
}

/// Assembler output: the prompt context plus the scored example matches the
/// literal adapter needs.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub context: PromptContext,
    /// Same order as `context.similar_examples`.
    pub example_matches: Vec<RetrievedMatch>,
    /// Record kinds for which at least one source failed.
    pub degraded: Vec<RecordKind>,
}

pub struct ContextAssembler {
    sources: Vec<Arc<dyn SimilarityStore>>,
    limits: ContextLimits,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn SimilarityStore>, limits: ContextLimits) -> Self {
        Self {
            sources: vec![store],
            limits,
        }
    }

    /// Add another retrieval source. Candidates from all sources are merged
    /// before ranking; earlier sources win score ties.
    pub fn with_source(mut self, store: Arc<dyn SimilarityStore>) -> Self {
        self.sources.push(store);
        self
    }

    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    /// Replace the limits, keeping every source.
    pub fn with_limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Never fails: a source error leaves that kind empty.
    pub async fn assemble(&self, question: &str) -> AssembledContext {
        let (examples, ddl, docs) = tokio::join!(
            self.collect(question, RecordKind::Example, self.limits.examples),
            self.collect(question, RecordKind::Ddl, self.limits.ddl),
            self.collect(question, RecordKind::Documentation, self.limits.docs),
        );

        let mut degraded = Vec::new();
        for (kind, failed) in [
            (RecordKind::Example, examples.1),
            (RecordKind::Ddl, ddl.1),
            (RecordKind::Documentation, docs.1),
        ] {
            if failed {
                degraded.push(kind);
            }
        }

        let example_matches = examples.0;
        let similar_examples: Vec<TrainingExample> = example_matches
            .iter()
            .filter_map(|m| m.as_example().cloned())
            .collect();

        let mut related_ddl: Vec<SchemaFact> = ddl.0.iter().filter_map(|m| m.as_schema().cloned()).collect();
        let mut related_docs: Vec<DocumentationFact> =
            docs.0.iter().filter_map(|m| m.as_documentation().cloned()).collect();

        if let Some(budget) = self.limits.char_budget {
            let used = question.len()
                + similar_examples
                    .iter()
                    .map(|e| e.question.len() + e.sql.len())
                    .sum::<usize>();
            let mut remaining = budget.saturating_sub(used);
            let before = (related_ddl.len(), related_docs.len());
            related_ddl = take_within_budget(related_ddl, &mut remaining, |f| {
                f.identifier.len() + f.ddl_or_description.len()
            });
            related_docs = take_within_budget(related_docs, &mut remaining, |d| d.topic.len() + d.text.len());
            if before != (related_ddl.len(), related_docs.len()) {
                info!(
                    "Context budget of {} chars trimmed DDL {} -> {} and docs {} -> {}",
                    budget,
                    before.0,
                    related_ddl.len(),
                    before.1,
                    related_docs.len()
                );
            }
        }

        info!(
            "Assembled context: {} examples, {} DDL, {} docs{}",
            similar_examples.len(),
            related_ddl.len(),
            related_docs.len(),
            if degraded.is_empty() {
                String::new()
            } else {
                format!(" (degraded: {:?})", degraded)
            }
        );

        AssembledContext {
            context: PromptContext {
                similar_examples,
                related_ddl,
                related_docs,
            },
            example_matches,
            degraded,
        }
    }

    /// Merge one kind across sources: sort by score descending (first seen
    /// wins ties) and truncate. Returns whether any source failed.
    async fn collect(&self, question: &str, kind: RecordKind, limit: usize) -> (Vec<RetrievedMatch>, bool) {
        let mut candidates: Vec<RetrievedMatch> = Vec::new();
        let mut failed = false;

        for (idx, source) in self.sources.iter().enumerate() {
            match source.find_similar(question, kind, limit).await {
                Ok(matches) => {
                    debug!("Source {} returned {} {} matches", idx, matches.len(), kind);
                    candidates.extend(matches);
                }
                Err(StoreError::StoreUnavailable(reason)) => {
                    warn!("Source {} unavailable for {}: {}, continuing without it", idx, kind, reason);
                    failed = true;
                }
                Err(e) => {
                    warn!("Source {} failed for {}: {}, continuing without it", idx, kind, e);
                    failed = true;
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if kind == RecordKind::Example {
            // Duplicates are dropped before truncation so they don't eat slots.
            candidates = dedup_examples(candidates);
        }
        candidates.truncate(limit);
        (candidates, failed)
    }
}

/// Drop exact duplicate question/SQL pairs, keeping the first occurrence.
fn dedup_examples(matches: Vec<RetrievedMatch>) -> Vec<RetrievedMatch> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    matches
        .into_iter()
        .filter(|m| match m.as_example() {
            Some(e) => seen.insert((e.question.trim().to_string(), e.sql.trim().to_string())),
            None => true,
        })
        .collect()
}

fn take_within_budget<T>(items: Vec<T>, remaining: &mut usize, size: impl Fn(&T) -> usize) -> Vec<T> {
    let mut kept = Vec::new();
    for item in items {
        let cost = size(&item);
        if cost > *remaining {
            break;
        }
        *remaining -= cost;
        kept.push(item);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Record;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Canned matches per kind; kinds listed in `down` fail.
    struct FakeStore {
        matches: HashMap<RecordKind, Vec<RetrievedMatch>>,
        down: Vec<RecordKind>,
    }

    #[async_trait]
    impl SimilarityStore for FakeStore {
        async fn find_similar(
            &self,
            _text: &str,
            kind: RecordKind,
            limit: usize,
        ) -> Result<Vec<RetrievedMatch>, StoreError> {
            if self.down.contains(&kind) {
                return Err(StoreError::StoreUnavailable("connection refused".to_string()));
            }
            let mut found = self.matches.get(&kind).cloned().unwrap_or_default();
            found.truncate(limit);
            Ok(found)
        }

        async fn upsert(&self, _record: Record) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn example(question: &str, score: f32) -> RetrievedMatch {
        RetrievedMatch::new(
            Record::Example(TrainingExample::new(question, format!("SELECT '{}';", question))),
            score,
        )
    }

    fn ddl(name: &str, score: f32) -> RetrievedMatch {
        RetrievedMatch::new(
            Record::Ddl(SchemaFact {
                identifier: name.to_string(),
                ddl_or_description: format!("CREATE TABLE {} (id integer);", name),
            }),
            score,
        )
    }

    #[tokio::test]
    async fn test_examples_sorted_by_score() {
        let mut matches = HashMap::new();
        matches.insert(RecordKind::Example, vec![example("a", 0.91), example("b", 0.95)]);
        let store = Arc::new(FakeStore { matches, down: vec![] });

        let assembled = ContextAssembler::new(store, ContextLimits::default())
            .assemble("vendas")
            .await;

        assert_eq!(assembled.context.similar_examples[0].question, "b");
        assert_eq!(assembled.context.similar_examples[1].question, "a");
        assert_eq!(assembled.example_matches[0].similarity_score, 0.95);
    }

    #[tokio::test]
    async fn test_examples_never_exceed_five() {
        let many: Vec<RetrievedMatch> = (0..12).map(|i| example(&format!("q{}", i), 0.5)).collect();
        let mut matches = HashMap::new();
        matches.insert(RecordKind::Example, many.clone());
        let primary = Arc::new(FakeStore { matches: matches.clone(), down: vec![] });
        let secondary = Arc::new(FakeStore { matches, down: vec![] });

        let assembled = ContextAssembler::new(primary, ContextLimits::new(50, 5, 5))
            .with_source(secondary)
            .assemble("vendas")
            .await;

        assert!(assembled.context.similar_examples.len() <= 5);
        // ties keep first-seen order
        assert_eq!(assembled.context.similar_examples[0].question, "q0");
    }

    #[tokio::test]
    async fn test_sources_merged_with_first_seen_tie_break() {
        let mut first = HashMap::new();
        first.insert(RecordKind::Example, vec![example("from-first", 0.8)]);
        let mut second = HashMap::new();
        second.insert(RecordKind::Example, vec![example("from-second", 0.8), example("best", 0.9)]);

        let assembled = ContextAssembler::new(Arc::new(FakeStore { matches: first, down: vec![] }), ContextLimits::default())
            .with_source(Arc::new(FakeStore { matches: second, down: vec![] }))
            .assemble("q")
            .await;

        let order: Vec<&str> = assembled
            .context
            .similar_examples
            .iter()
            .map(|e| e.question.as_str())
            .collect();
        assert_eq!(order, vec!["best", "from-first", "from-second"]);
    }

    #[tokio::test]
    async fn test_unavailable_source_degrades_only_its_kind() {
        let mut matches = HashMap::new();
        matches.insert(RecordKind::Example, vec![example("a", 0.9)]);
        matches.insert(RecordKind::Ddl, vec![ddl("sale_order", 0.7)]);
        let store = Arc::new(FakeStore {
            matches,
            down: vec![RecordKind::Ddl],
        });

        let assembled = ContextAssembler::new(store, ContextLimits::default())
            .assemble("vendas")
            .await;

        assert_eq!(assembled.context.similar_examples.len(), 1);
        assert!(assembled.context.related_ddl.is_empty());
        assert_eq!(assembled.degraded, vec![RecordKind::Ddl]);
    }

    #[tokio::test]
    async fn test_duplicate_examples_collapsed() {
        let mut matches = HashMap::new();
        matches.insert(RecordKind::Example, vec![example("a", 0.9), example("a", 0.9), example("b", 0.5)]);
        let store = Arc::new(FakeStore { matches, down: vec![] });

        let assembled = ContextAssembler::new(store, ContextLimits::default())
            .assemble("q")
            .await;
        assert_eq!(assembled.context.similar_examples.len(), 2);
    }

    #[tokio::test]
    async fn test_char_budget_trims_ddl_not_examples() {
        let mut matches = HashMap::new();
        matches.insert(RecordKind::Example, vec![example("a", 0.9)]);
        matches.insert(RecordKind::Ddl, vec![ddl("sale_order", 0.9), ddl("sale_order_line", 0.8)]);
        let store = Arc::new(FakeStore { matches, down: vec![] });

        let limits = ContextLimits::default().with_char_budget(80);
        let assembled = ContextAssembler::new(store, limits).assemble("q").await;

        assert_eq!(assembled.context.similar_examples.len(), 1);
        assert_eq!(assembled.context.related_ddl.len(), 1);
        assert_eq!(assembled.context.related_ddl[0].identifier, "sale_order");
    }
}
