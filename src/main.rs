use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use odoo_sql_assistant::config::AssistantConfig;
use odoo_sql_assistant::pipeline::QuestionPipeline;
use odoo_sql_assistant::sql::{evaluate_sql_quality, SqlQualityReport};
use odoo_sql_assistant::store::{Embedder, HashingEmbedder, OpenAiEmbedder, RecordKind, VectorSimilarityStore};
use odoo_sql_assistant::training::{ingest, TrainingData};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "odoo-sql")]
#[command(about = "Natural-language questions to SQL over an Odoo database")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Embedding backend for the vector store
    #[arg(long, value_enum, default_value_t = EmbedderKind::Hashing, global = true)]
    embedder: EmbedderKind,

    /// Vector store file (or set VECTOR_STORE_PATH)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long, global = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate SQL for a question
    Ask {
        question: String,
    },
    /// Load question/SQL pairs, DDL and documentation into the store
    Train {
        file: PathBuf,

        /// Treat the file as a `question,sql` CSV
        #[arg(long)]
        csv: bool,
    },
    /// Score a SQL statement
    Evaluate {
        sql: String,
    },
    /// Show document counts in the store
    Stats,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    Hashing,
    Openai,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = AssistantConfig::from_env();
    if let Some(key) = args.api_key {
        config.api_key = Some(key);
    }
    if let Some(store) = args.store {
        config.store_path = store;
    }

    match args.command {
        Commands::Ask { question } => ask(&config, args.embedder, &question).await,
        Commands::Train { file, csv } => train(&config, args.embedder, file, csv).await,
        Commands::Evaluate { sql } => {
            print_quality(&evaluate_sql_quality(&sql));
            Ok(())
        }
        Commands::Stats => stats(&config, args.embedder),
    }
}

fn open_store(config: &AssistantConfig, kind: EmbedderKind) -> Result<VectorSimilarityStore> {
    let embedder: Arc<dyn Embedder> = match kind {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
        EmbedderKind::Openai => Arc::new(OpenAiEmbedder::new(
            config.effective_api_key(),
            config.base_url.clone(),
            config.embedding_model.clone(),
            config.timeout(),
        )),
    };
    VectorSimilarityStore::open(&config.store_path, embedder)
        .with_context(|| format!("Failed to open vector store at {}", config.store_path.display()))
}

async fn ask(config: &AssistantConfig, kind: EmbedderKind, question: &str) -> Result<()> {
    let store = Arc::new(open_store(config, kind)?);
    if store.is_empty() {
        info!("Vector store is empty; run `odoo-sql train` for better answers");
    }

    let pipeline = QuestionPipeline::from_config(config, store);
    let answer = match pipeline.ask(question).await {
        Ok(answer) => answer,
        Err(e) if e.is_user_error() => anyhow::bail!("Could not understand the question: {}", e),
        Err(e) => anyhow::bail!("Could not generate SQL: {}", e),
    };

    println!("\n=== SQL ===");
    println!("{}", answer.sql);
    println!("\n=== Adaptation ===");
    println!("changed: {}", answer.adaptation.changed);
    println!("reason:  {}", answer.adaptation.reason);
    if !answer.degraded_sources.is_empty() {
        let kinds: Vec<&str> = answer.degraded_sources.iter().map(|k| k.as_str()).collect();
        println!("degraded sources: {}", kinds.join(", "));
    }
    print_quality(&evaluate_sql_quality(&answer.sql));
    Ok(())
}

async fn train(config: &AssistantConfig, kind: EmbedderKind, file: PathBuf, csv: bool) -> Result<()> {
    let data = if csv {
        TrainingData::from_csv_file(&file)
    } else {
        TrainingData::from_json_file(&file)
    }
    .with_context(|| format!("Failed to read training file {}", file.display()))?;

    let store = open_store(config, kind)?;
    let report = ingest(&store, data).await?;
    store.save()?;

    println!(
        "Trained {} examples, {} DDL, {} docs ({} skipped); store now holds {} documents",
        report.examples,
        report.ddl,
        report.documentation,
        report.skipped,
        store.len()
    );
    Ok(())
}

fn stats(config: &AssistantConfig, kind: EmbedderKind) -> Result<()> {
    let store = open_store(config, kind)?;
    println!("Vector store: {}", config.store_path.display());
    for record_kind in RecordKind::ALL {
        println!("  {:<14} {}", record_kind.as_str(), store.count_by_kind(record_kind));
    }
    println!("  {:<14} {}", "total", store.len());
    Ok(())
}

fn print_quality(report: &SqlQualityReport) {
    println!("\n=== Quality: {}/{} ===", report.score, report.max_score);
    println!(
        "syntax {} | best practices {} | performance {} | security {}",
        report.syntax, report.best_practices, report.performance, report.security
    );
    for issue in &report.issues {
        println!("  issue: {}", issue);
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    for suggestion in &report.suggestions {
        println!("  suggestion: {}", suggestion);
    }
}
