use async_trait::async_trait;
use odoo_sql_assistant::context::{ContextAssembler, ContextLimits};
use odoo_sql_assistant::llm::{CompletionBackend, GenerationClient, LlmClient};
use odoo_sql_assistant::store::{HashingEmbedder, VectorSimilarityStore};
use odoo_sql_assistant::training::{ingest, DdlRow, DocumentationRow, ExampleRow, TrainingData};
use odoo_sql_assistant::{
    extract_sql, AssistantError, ExtractError, LiteralAdapter, ModelError, QuestionPipeline, Record, RecordKind,
    RetrievedMatch, SimilarityStore, StoreError, TrainingExample,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SOLD_LAST_30_DAYS_SQL: &str = "SELECT\n\
    pt.name AS produto,\n\
    SUM(sol.product_uom_qty) AS quantidade_vendida\n\
FROM sale_order_line sol\n\
JOIN sale_order so ON sol.order_id = so.id\n\
JOIN product_product pp ON sol.product_id = pp.id\n\
JOIN product_template pt ON pp.product_tmpl_id = pt.id\n\
WHERE so.state IN ('sale', 'done')\n\
    AND so.date_order >= NOW() - INTERVAL '30 days'  -- Filtrando para os últimos 30 dias\n\
GROUP BY pt.name\n\
ORDER BY quantidade_vendida DESC;";

fn training_data() -> TrainingData {
    TrainingData {
        examples: vec![
            ExampleRow {
                question: "Quais produtos foram vendidos nos últimos 30 dias?".to_string(),
                sql: SOLD_LAST_30_DAYS_SQL.to_string(),
            },
            ExampleRow {
                question: "Quais são os 10 clientes que mais compraram?".to_string(),
                sql: "SELECT rp.name, SUM(so.amount_total) AS total FROM sale_order so \
                      JOIN res_partner rp ON so.partner_id = rp.id GROUP BY rp.name ORDER BY total DESC LIMIT 10;"
                    .to_string(),
            },
        ],
        ddl: vec![DdlRow {
            identifier: "sale_order".to_string(),
            ddl: "CREATE TABLE sale_order (id integer, partner_id integer, state varchar, date_order timestamp, amount_total numeric);"
                .to_string(),
        }],
        documentation: vec![DocumentationRow {
            topic: "vendas".to_string(),
            text: "Pedidos confirmados têm state 'sale' ou 'done'.".to_string(),
        }],
    }
}

async fn trained_store() -> Arc<VectorSimilarityStore> {
    let store = Arc::new(VectorSimilarityStore::new(Arc::new(HashingEmbedder::default())));
    ingest(&*store, training_data()).await.unwrap();
    store
}

/// Replays the SQL of the first worked example in the prompt, like a model
/// that copies its example verbatim, and remembers every prompt.
struct CopyingBackend {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl CompletionBackend for CopyingBackend {
    async fn complete(&self, prompt: &str, _timeout: Duration) -> Result<String, ModelError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let sql = prompt
            .split_once("SQL:\n")
            .map(|(_, rest)| rest.split("\n\n").next().unwrap_or(""))
            .unwrap_or("SELECT 1;");
        Ok(format!("Claro! Aqui está a consulta:\n```sql\n{}\n```", sql))
    }
}

fn copying_pipeline(store: Arc<dyn SimilarityStore>) -> (QuestionPipeline, Arc<CopyingBackend>) {
    let backend = Arc::new(CopyingBackend {
        prompts: Mutex::new(Vec::new()),
    });
    let generator = GenerationClient::new(backend.clone(), Duration::from_secs(5));
    (QuestionPipeline::new(store, generator), backend)
}

#[tokio::test]
async fn test_copied_day_interval_is_adapted_end_to_end() {
    let store = trained_store().await;
    let (pipeline, backend) = copying_pipeline(store);

    let answer = pipeline
        .ask("Quais produtos foram vendidos nos últimos 60 dias, mas que não tem estoque?")
        .await
        .unwrap();

    assert!(answer.adaptation.changed);
    assert!(answer.sql.contains("INTERVAL '60 days'"));
    assert!(answer.sql.contains("últimos 60 dias"));
    assert_eq!(answer.adaptation.original_sql, SOLD_LAST_30_DAYS_SQL);
    assert!(answer.degraded_sources.is_empty());

    let prompts = backend.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("CREATE TABLE sale_order"));
    assert!(prompts[0].contains("Pedidos confirmados"));
}

#[tokio::test]
async fn test_store_persists_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    {
        let store = VectorSimilarityStore::open(&path, Arc::new(HashingEmbedder::default())).unwrap();
        ingest(&store, training_data()).await.unwrap();
        store.save().unwrap();
    }

    let reopened = VectorSimilarityStore::open(&path, Arc::new(HashingEmbedder::default())).unwrap();
    assert_eq!(reopened.count_by_kind(RecordKind::Example), 2);
    assert_eq!(reopened.count_by_kind(RecordKind::Ddl), 1);

    let matches = reopened
        .find_similar("produtos vendidos nos últimos 90 dias", RecordKind::Example, 1)
        .await
        .unwrap();
    assert_eq!(
        matches[0].as_example().unwrap().question,
        "Quais produtos foram vendidos nos últimos 30 dias?"
    );
}

/// Wraps a store and fails one record kind.
struct PartialOutage {
    inner: Arc<VectorSimilarityStore>,
    down: RecordKind,
    calls: AtomicUsize,
}

#[async_trait]
impl SimilarityStore for PartialOutage {
    async fn find_similar(
        &self,
        text: &str,
        kind: RecordKind,
        limit: usize,
    ) -> Result<Vec<RetrievedMatch>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if kind == self.down {
            return Err(StoreError::StoreUnavailable("index offline".to_string()));
        }
        self.inner.find_similar(text, kind, limit).await
    }

    async fn upsert(&self, record: Record) -> Result<(), StoreError> {
        self.inner.upsert(record).await
    }
}

#[tokio::test]
async fn test_single_source_outage_still_answers() {
    for down in RecordKind::ALL {
        let store = Arc::new(PartialOutage {
            inner: trained_store().await,
            down,
            calls: AtomicUsize::new(0),
        });
        let (pipeline, _) = copying_pipeline(store);

        let answer = pipeline.ask("Quais produtos foram vendidos nos últimos 60 dias?").await.unwrap();
        assert_eq!(answer.degraded_sources, vec![down]);
        assert!(extract_sql(&answer.sql).is_ok(), "unusable SQL with {} down", down);
    }
}

#[tokio::test]
async fn test_blank_question_is_rejected_before_any_call() {
    let store = Arc::new(PartialOutage {
        inner: trained_store().await,
        down: RecordKind::Documentation,
        calls: AtomicUsize::new(0),
    });
    let (pipeline, backend) = copying_pipeline(store.clone());

    let err = pipeline.generate_sql("").await.unwrap_err();
    assert!(matches!(err, AssistantError::InvalidQuery));
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    assert!(backend.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_prompt_never_carries_more_than_five_examples() {
    let store = Arc::new(VectorSimilarityStore::new(Arc::new(HashingEmbedder::default())));
    let examples = (1..=12)
        .map(|i| ExampleRow {
            question: format!("Quantos pedidos o cliente {} fez?", i),
            sql: format!("SELECT COUNT(*) FROM sale_order WHERE partner_id = {};", i),
        })
        .collect();
    ingest(
        &*store,
        TrainingData {
            examples,
            ..TrainingData::default()
        },
    )
    .await
    .unwrap();

    let assembled = ContextAssembler::new(store.clone(), ContextLimits::new(20, 5, 5))
        .assemble("Quantos pedidos o cliente fez?")
        .await;
    assert_eq!(assembled.context.similar_examples.len(), 5);

    let (pipeline, backend) = copying_pipeline(store);
    pipeline.generate_sql("Quantos pedidos o cliente fez?").await.unwrap();
    let prompts = backend.prompts.lock().unwrap();
    assert_eq!(prompts[0].matches("Question: ").count(), 5);
}

#[tokio::test]
async fn test_scores_order_examples() {
    struct Scored;

    #[async_trait]
    impl SimilarityStore for Scored {
        async fn find_similar(
            &self,
            _text: &str,
            kind: RecordKind,
            _limit: usize,
        ) -> Result<Vec<RetrievedMatch>, StoreError> {
            if kind != RecordKind::Example {
                return Ok(vec![]);
            }
            Ok(vec![
                RetrievedMatch::new(Record::Example(TrainingExample::new("lower", "SELECT 1;")), 0.91),
                RetrievedMatch::new(Record::Example(TrainingExample::new("higher", "SELECT 2;")), 0.95),
            ])
        }

        async fn upsert(&self, _record: Record) -> Result<(), StoreError> {
            Ok(())
        }
    }

    let assembled = ContextAssembler::new(Arc::new(Scored), ContextLimits::default())
        .assemble("qualquer pergunta")
        .await;
    assert_eq!(assembled.context.similar_examples[0].question, "higher");
    assert_eq!(assembled.context.similar_examples[1].question, "lower");
}

#[tokio::test]
async fn test_generation_failures_surface_as_generation_failed() {
    struct Down;

    #[async_trait]
    impl CompletionBackend for Down {
        async fn complete(&self, _prompt: &str, timeout: Duration) -> Result<String, ModelError> {
            Err(ModelError::ModelTimeout(timeout))
        }
    }

    let store = trained_store().await;
    let pipeline = QuestionPipeline::new(store, GenerationClient::new(Arc::new(Down), Duration::from_secs(1)));
    let err = pipeline.generate_sql("Quais produtos foram vendidos?").await.unwrap_err();
    assert!(matches!(err, AssistantError::GenerationFailed(ModelError::ModelTimeout(_))));
    assert!(!err.is_user_error());
}

#[tokio::test]
async fn test_extraction_scenarios() {
    assert_eq!(extract_sql("```sql\nSELECT 1;\n```").unwrap(), "SELECT 1;");
    assert_eq!(
        extract_sql("Desculpe, não consigo responder."),
        Err(ExtractError::NoSqlFound)
    );
    assert_eq!(
        extract_sql("WITH recent AS (\n    SELECT id FROM sale_order\n)\n\nSELECT COUNT(*) FROM recent").unwrap(),
        "WITH recent AS (\n    SELECT id FROM sale_order\n)\n\nSELECT COUNT(*) FROM recent"
    );
}

#[tokio::test]
async fn test_adaptation_is_idempotent_on_pipeline_output() {
    let store = trained_store().await;
    let (pipeline, _) = copying_pipeline(store.clone());
    let question = "Quais produtos foram vendidos nos últimos 45 dias?";

    let answer = pipeline.ask(question).await.unwrap();
    let matches = store.find_similar(question, RecordKind::Example, 5).await.unwrap();
    let again = LiteralAdapter::default().adapt(question, &matches, &answer.sql);

    assert_eq!(again.adapted_sql, answer.sql);
    assert!(!again.changed);
}

#[tokio::test]
async fn test_offline_dummy_mode_round_trip() {
    let store = trained_store().await;
    let llm = LlmClient::new(
        "dummy-api-key".to_string(),
        "http://127.0.0.1:9".to_string(),
        "gpt-4.1-nano".to_string(),
    );
    let pipeline = QuestionPipeline::new(store, GenerationClient::new(Arc::new(llm), Duration::from_secs(1)));

    let sql = pipeline
        .generate_sql("Quais produtos foram vendidos nos últimos 15 dias?")
        .await
        .unwrap();
    assert!(sql.contains("INTERVAL '15 days'"));
}
