//! Duplicate classification delegated to an external program.
//!
//! The program is invoked as `<program> [args...] <input.json> <output.json>`.
//! The input holds one [`ClassifierRow`] per pooled document; the program
//! writes a JSON array of [`PairRow`]s and must exit with status 0.

use super::classifier::{ClassifierError, DuplicateClassifier};
use super::rules::RuleTable;
use super::signals::{CandidatePair, SimilaritySignals};
use crate::document::{Document, DocumentId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Flat per-document row handed to the program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierRow {
    pub author: String,
    pub year: Option<i32>,
    pub journal: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub record_id: String,
    pub source: String,
}

impl From<&Document> for ClassifierRow {
    fn from(doc: &Document) -> Self {
        Self {
            author: doc.authors().join("; "),
            year: doc.year(),
            journal: doc.journal().map(str::to_string),
            doi: doc.doi().map(ToString::to_string),
            title: doc.title().map(str::to_string),
            abstract_text: doc.abstract_text().map(str::to_string),
            record_id: doc.id().to_string(),
            source: doc.source().to_string(),
        }
    }
}

/// One compared pair reported by the program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRow {
    pub record_id1: String,
    pub record_id2: String,
    #[serde(default)]
    pub title: f64,
    #[serde(default)]
    pub author: f64,
    #[serde(rename = "abstract", default)]
    pub abstract_text: f64,
    #[serde(default)]
    pub year: Option<bool>,
    #[serde(default)]
    pub doi: Option<f64>,
    /// Decided from the rule table when absent
    #[serde(default)]
    pub duplicate: Option<bool>,
}

/// Classifier running an external program over temp files
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    table: RuleTable,
}

impl CommandClassifier {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
            table: RuleTable::default(),
        }
    }

    /// Arguments placed before the input and output paths
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Table used for rows that carry no decision
    #[must_use]
    pub fn with_rule_table(mut self, table: RuleTable) -> Self {
        self.table = table;
        self
    }

    fn to_pair(&self, row: PairRow) -> Option<CandidatePair> {
        let (Ok(left), Ok(right)) = (
            row.record_id1.parse::<DocumentId>(),
            row.record_id2.parse::<DocumentId>(),
        ) else {
            warn!(
                "Skipping pair with malformed record ids: {} / {}",
                row.record_id1, row.record_id2
            );
            return None;
        };

        let signals = SimilaritySignals {
            title: row.title,
            author: row.author,
            abstract_text: row.abstract_text,
            year: row.year,
            doi: row.doi,
        };

        Some(CandidatePair {
            left,
            right,
            duplicate: row.duplicate.unwrap_or_else(|| self.table.decide(&signals)),
            signals,
        })
    }
}

#[async_trait]
impl DuplicateClassifier for CommandClassifier {
    fn name(&self) -> &str {
        "command"
    }

    async fn classify(&self, pool: &[Document]) -> Result<Vec<CandidatePair>, ClassifierError> {
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("records.json");
        let output = workdir.path().join("pairs.json");

        let rows: Vec<ClassifierRow> = pool.iter().map(ClassifierRow::from).collect();
        tokio::fs::write(&input, serde_json::to_vec(&rows)?).await?;

        info!(
            "Running classifier {} over {} records",
            self.program.display(),
            rows.len()
        );

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&input)
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ClassifierError::Timeout(self.timeout))??;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ClassifierError::Failed {
                status: result.status.to_string(),
                stderr: stderr.trim().chars().take(500).collect(),
            });
        }

        let raw = tokio::fs::read(&output).await?;
        let rows: Vec<PairRow> = serde_json::from_slice(&raw)?;
        debug!("Classifier reported {} pairs", rows.len());

        Ok(rows.into_iter().filter_map(|row| self.to_pair(row)).collect())
    }
}
