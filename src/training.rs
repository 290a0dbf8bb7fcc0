//! Training data ingestion.
//!
//! Loads question/SQL pairs, DDL and documentation from JSON or CSV and
//! upserts them into a similarity store.

use crate::error::Result;
use crate::store::{DocumentationFact, Record, SchemaFact, SimilarityStore, TrainingExample};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleRow {
    pub question: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdlRow {
    pub identifier: String,
    pub ddl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentationRow {
    pub topic: String,
    pub text: String,
}

/// On-disk training file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingData {
    #[serde(default)]
    pub examples: Vec<ExampleRow>,
    #[serde(default)]
    pub ddl: Vec<DdlRow>,
    #[serde(default)]
    pub documentation: Vec<DocumentationRow>,
}

impl TrainingData {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// CSV with a `question,sql` header.
    pub fn from_csv_file(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut examples = Vec::new();
        for row in reader.deserialize() {
            let row: ExampleRow = row?;
            examples.push(row);
        }
        Ok(Self {
            examples,
            ..Self::default()
        })
    }

    fn into_records(self) -> (Vec<Record>, usize) {
        let mut records = Vec::new();
        let mut skipped = 0;

        for row in self.examples {
            if row.question.trim().is_empty() || row.sql.trim().is_empty() {
                warn!("Skipping example with blank question or SQL");
                skipped += 1;
                continue;
            }
            records.push(Record::Example(TrainingExample::new(row.question.trim(), row.sql.trim())));
        }
        for row in self.ddl {
            if row.identifier.trim().is_empty() || row.ddl.trim().is_empty() {
                warn!("Skipping blank DDL entry");
                skipped += 1;
                continue;
            }
            records.push(Record::Ddl(SchemaFact {
                identifier: row.identifier.trim().to_string(),
                ddl_or_description: row.ddl.trim().to_string(),
            }));
        }
        for row in self.documentation {
            if row.text.trim().is_empty() {
                warn!("Skipping blank documentation entry");
                skipped += 1;
                continue;
            }
            records.push(Record::Documentation(DocumentationFact {
                topic: row.topic.trim().to_string(),
                text: row.text.trim().to_string(),
            }));
        }

        (records, skipped)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrainingReport {
    pub examples: usize,
    pub ddl: usize,
    pub documentation: usize,
    pub skipped: usize,
}

/// Upsert every record. Stops at the first store error.
pub async fn ingest(store: &dyn SimilarityStore, data: TrainingData) -> Result<TrainingReport> {
    let (records, skipped) = data.into_records();
    let mut report = TrainingReport {
        skipped,
        ..TrainingReport::default()
    };

    for record in records {
        match &record {
            Record::Example(_) => report.examples += 1,
            Record::Ddl(_) => report.ddl += 1,
            Record::Documentation(_) => report.documentation += 1,
        }
        store.upsert(record).await?;
    }

    info!(
        "Ingested {} examples, {} DDL, {} docs ({} skipped)",
        report.examples, report.ddl, report.documentation, report.skipped
    );
    Ok(report)
}
