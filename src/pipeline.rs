//! Question Pipeline Orchestrator
//!
//! One pass per question: assemble context, build the prompt, generate,
//! extract, adapt. Stages run strictly in order. A retrieval outage only
//! degrades context; generation and extraction failures end the call.
//! The orchestrator itself never retries.

use crate::adapt::{AdaptationDecision, LiteralAdapter};
use crate::config::AssistantConfig;
use crate::context::{ContextAssembler, ContextLimits};
use crate::error::{AssistantError, Result};
use crate::llm::GenerationClient;
use crate::observability::{QueryLog, QueryLogEntry};
use crate::prompt::PromptBuilder;
use crate::sql::extract_sql;
use crate::store::{RecordKind, SimilarityStore};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

/// Questions kept by the response cache before completed answers are evicted.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Idle,
    ContextAssembled,
    PromptBuilt,
    Generated,
    Extracted,
    Adapted,
    Done,
    Errored,
}

/// Final SQL plus the adaptation decision that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub sql: String,
    pub adaptation: AdaptationDecision,
    /// Record kinds whose retrieval failed for this question.
    pub degraded_sources: Vec<RecordKind>,
}

/// Stages visited by one call, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTrace {
    stages: Vec<PipelineStage>,
}

impl StageTrace {
    fn new() -> Self {
        Self {
            stages: vec![PipelineStage::Idle],
        }
    }

    fn advance(&mut self, stage: PipelineStage) {
        debug!("Pipeline stage -> {:?}", stage);
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn last(&self) -> PipelineStage {
        self.stages.last().copied().unwrap_or(PipelineStage::Idle)
    }
}

pub struct QuestionPipeline {
    assembler: ContextAssembler,
    prompt_builder: PromptBuilder,
    generator: GenerationClient,
    adapter: LiteralAdapter,
    cache: Option<ResponseCache>,
    query_log: Option<Arc<QueryLog>>,
}

/// Single-flight answers keyed by trimmed question text.
struct ResponseCache {
    entries: DashMap<String, Arc<OnceCell<Answer>>>,
    capacity: usize,
}

impl ResponseCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Cell for `key`, making room first when the key is new and the map is full.
    fn cell(&self, key: &str) -> Arc<OnceCell<Answer>> {
        if let Some(cell) = self.entries.get(key) {
            return Arc::clone(cell.value());
        }
        if self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drop completed answers until there is room for one more key. Cells still
    /// being computed stay so their waiters keep sharing one call.
    fn evict(&self) {
        let mut excess = (self.entries.len() + 1).saturating_sub(self.capacity);
        self.entries.retain(|_, cell| {
            if excess > 0 && cell.initialized() {
                excess -= 1;
                false
            } else {
                true
            }
        });
        debug!("Response cache evicted down to {} entries", self.entries.len());
    }

    /// Forget a key whose computation failed, unless another caller has since
    /// filled it.
    fn discard_failed(&self, key: &str) {
        self.entries.remove_if(key, |_, cell| !cell.initialized());
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl QuestionPipeline {
    pub fn new(store: Arc<dyn SimilarityStore>, generator: GenerationClient) -> Self {
        Self {
            assembler: ContextAssembler::new(store, ContextLimits::default()),
            prompt_builder: PromptBuilder::default(),
            generator,
            adapter: LiteralAdapter::default(),
            cache: None,
            query_log: None,
        }
    }

    pub fn from_config(config: &AssistantConfig, store: Arc<dyn SimilarityStore>) -> Self {
        let pipeline = Self::new(store, GenerationClient::from_config(config))
            .with_assembler_limits(ContextLimits::from_config(config))
            .with_dialect(&config.dialect)
            .with_query_log(Arc::new(QueryLog::new(config.query_log_path.clone(), 1000)));
        if config.cache_responses {
            pipeline.with_cache()
        } else {
            pipeline
        }
    }

    /// Replace the context assembler, e.g. to add retrieval sources.
    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    /// Replace the retrieval limits; every source of the current assembler is kept.
    pub fn with_assembler_limits(mut self, limits: ContextLimits) -> Self {
        self.assembler = self.assembler.with_limits(limits);
        self
    }

    pub fn with_dialect(mut self, dialect: &str) -> Self {
        self.prompt_builder = PromptBuilder::new(dialect);
        self.adapter = LiteralAdapter::new(dialect);
        self
    }

    /// Reuse answers for identical questions; concurrent identical questions
    /// share one generation call.
    pub fn with_cache(self) -> Self {
        self.with_cache_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = Some(ResponseCache::new(capacity));
        self
    }

    /// Number of questions currently held by the response cache.
    pub fn cached_questions(&self) -> usize {
        self.cache.as_ref().map(ResponseCache::len).unwrap_or(0)
    }

    pub fn with_query_log(mut self, log: Arc<QueryLog>) -> Self {
        self.query_log = Some(log);
        self
    }

    pub fn query_log(&self) -> Option<&Arc<QueryLog>> {
        self.query_log.as_ref()
    }

    /// Final SQL for `question`.
    pub async fn generate_sql(&self, question: &str) -> Result<String> {
        Ok(self.ask(question).await?.sql)
    }

    /// Final SQL plus the adaptation decision. Does not execute anything.
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let key = question.trim();
        if key.is_empty() {
            self.log(QueryLogEntry::failure(question, AssistantError::InvalidQuery, 0));
            return Err(AssistantError::InvalidQuery);
        }

        match &self.cache {
            Some(cache) => {
                let cell = cache.cell(key);
                if cell.initialized() {
                    debug!("Answer cache hit");
                }
                match cell.get_or_try_init(|| async { self.ask_with_trace(key).await.0 }).await {
                    Ok(answer) => Ok(answer.clone()),
                    Err(e) => {
                        cache.discard_failed(key);
                        Err(e)
                    }
                }
            }
            None => self.ask_with_trace(key).await.0,
        }
    }

    /// Run the pipeline and report the stages it went through.
    pub async fn ask_with_trace(&self, question: &str) -> (Result<Answer>, StageTrace) {
        let mut trace = StageTrace::new();
        let started = Instant::now();

        let result = self.run(question, &mut trace).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(answer) => {
                trace.advance(PipelineStage::Done);
                info!("Answered in {} ms (adaptation: {})", elapsed_ms, answer.adaptation.reason);
                self.log(QueryLogEntry::success(question, answer.adaptation.clone(), elapsed_ms));
            }
            Err(e) => {
                trace.advance(PipelineStage::Errored);
                error!("Question failed after {} ms: {}", elapsed_ms, e);
                self.log(QueryLogEntry::failure(question, e, elapsed_ms));
            }
        }

        (result, trace)
    }

    async fn run(&self, question: &str, trace: &mut StageTrace) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(AssistantError::InvalidQuery);
        }
        info!("Question received: {}", question);

        let assembled = self.assembler.assemble(question).await;
        trace.advance(PipelineStage::ContextAssembled);

        let prompt = self.prompt_builder.build(question, &assembled.context);
        debug!("Prompt built ({} chars)", prompt.len());
        trace.advance(PipelineStage::PromptBuilt);

        let completion = self.generator.submit(&prompt).await?;
        trace.advance(PipelineStage::Generated);

        let sql = extract_sql(&completion)?;
        debug!("Extracted SQL: {}", sql);
        trace.advance(PipelineStage::Extracted);

        let adaptation = self.adapter.adapt(question, &assembled.example_matches, &sql);
        trace.advance(PipelineStage::Adapted);

        Ok(Answer {
            sql: adaptation.adapted_sql.clone(),
            adaptation,
            degraded_sources: assembled.degraded,
        })
    }

    fn log(&self, entry: QueryLogEntry) {
        if let Some(log) = &self.query_log {
            log.record(entry);
        }
    }
}
