pub mod adapt;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod prompt;
pub mod sql;
pub mod store;
pub mod training;

pub use adapt::{AdaptationDecision, LiteralAdapter, NumericToken, TokenKind};
pub use config::AssistantConfig;
pub use context::{AssembledContext, ContextAssembler, ContextLimits, PromptContext};
pub use error::{AssistantError, ExtractError, ModelError, Result, StoreError};
pub use llm::{CompletionBackend, GenerationClient, LlmClient, RetryPolicy};
pub use pipeline::{Answer, PipelineStage, QuestionPipeline};
pub use prompt::{build_prompt, PromptBuilder};
pub use sql::extract_sql;
pub use store::{
    DocumentationFact, ExampleSource, Record, RecordKind, RetrievedMatch, SchemaFact, SimilarityStore,
    TrainingExample,
};
