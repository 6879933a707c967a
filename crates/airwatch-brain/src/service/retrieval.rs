//! Document retrieval and the RAG gate.
//!
//! Retrieval returns ranked `{id, schema, score}` candidates plus a context
//! string. The gate decides whether those candidates are good enough to answer
//! from, or whether the query goes to plain generation instead.

use std::collections::HashSet;
use std::path::PathBuf;

use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::ScoredDocument;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::service::intent::canonical_field;
use crate::service::time::extract_datetime_strings;

/// Schema tags of documents that carry sensor data.
pub const SENSOR_SCHEMAS: &[&str] = &["raw_list", "minavg", "houravg", "mintrend"];

/// Identifier fragments that mark a sensor-data document regardless of schema.
pub const SENSOR_ID_PATTERNS: &[&str] = &["rawdata", "houravg", "minavg", "mintrend"];

const DATE_EVIDENCE_BOOST: f64 = 0.3;

#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// Ranked best first.
    pub docs: Vec<ScoredDocument>,
    pub context: String,
}

impl Retrieval {
    pub fn top_score(&self) -> f64 {
        self.docs.first().map(|d| d.score).unwrap_or(0.0)
    }
}

#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Retrieval>;
}

/// Schema tag for a document identifier.
pub fn detect_schema(id: &str) -> &'static str {
    let lower = id.to_lowercase();
    if lower.contains("rawdata") {
        "raw_list"
    } else if lower.contains("minavg") {
        "minavg"
    } else if lower.contains("houravg") {
        "houravg"
    } else if lower.contains("mintrend") {
        "mintrend"
    } else {
        "text"
    }
}

pub fn has_sensor_schema_doc(docs: &[ScoredDocument]) -> bool {
    docs.iter().any(|d| {
        let id = d.id.to_lowercase();
        SENSOR_SCHEMAS.contains(&d.schema.as_str())
            || SENSOR_ID_PATTERNS.iter().any(|p| id.contains(p))
    })
}

/// Answer from retrieved context only when some candidate is sensor data and
/// the best candidate clears the threshold.
pub fn use_rag(docs: &[ScoredDocument], threshold: f64) -> bool {
    match docs.first() {
        Some(top) => has_sensor_schema_doc(docs) && top.score >= threshold,
        None => false,
    }
}

#[derive(Debug, Clone)]
struct IndexedDocument {
    id: String,
    schema: &'static str,
    text: String,
    tokens: HashSet<String>,
}

/// Lowercased word tokens, with field synonyms folded to one name.
fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| match canonical_field(t) {
            Some(field) => field.as_str().to_string(),
            None => t.to_string(),
        })
        .collect()
}

/// Token-overlap retriever over the files of one directory.
pub struct LocalDocumentIndex {
    dir: PathBuf,
    top_k: usize,
    limit_context_chars: usize,
    docs: OnceCell<Vec<IndexedDocument>>,
}

impl LocalDocumentIndex {
    pub fn new(dir: impl Into<PathBuf>, top_k: usize, limit_context_chars: usize) -> Self {
        Self {
            dir: dir.into(),
            top_k: top_k.max(1),
            limit_context_chars,
            docs: OnceCell::new(),
        }
    }

    async fn documents(&self) -> Result<&[IndexedDocument]> {
        let docs = self.docs.get_or_try_init(|| self.load()).await?;
        Ok(docs.as_slice())
    }

    async fn load(&self) -> Result<Vec<IndexedDocument>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("[rag] docs directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AirwatchError::Retrieval(format!(
                    "cannot read {}: {e}",
                    self.dir.display()
                )))
            }
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !matches!(ext, "json" | "jsonl" | "txt" | "md") {
                continue;
            }
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("[rag] skipping {}: {e}", path.display());
                    continue;
                }
            };
            let mut tokens = tokenize(&text);
            tokens.extend(tokenize(&id));
            docs.push(IndexedDocument {
                schema: detect_schema(&id),
                id,
                text,
                tokens,
            });
        }
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        info!("[rag] indexed {} document(s)", docs.len());
        Ok(docs)
    }

    fn score(query_tokens: &HashSet<String>, dates: &[String], doc: &IndexedDocument) -> f64 {
        if query_tokens.is_empty() {
            return 0.0;
        }
        let overlap = query_tokens.intersection(&doc.tokens).count() as f64;
        let mut score = overlap / query_tokens.len() as f64;
        if dates
            .iter()
            .any(|d| doc.id.contains(d.as_str()) || doc.text.contains(d.as_str()))
        {
            score += DATE_EVIDENCE_BOOST;
        }
        score.min(1.0)
    }
}

/// Query dates as `YYYY-MM-DD`, to match against document ids and bodies.
fn query_dates(query: &str) -> Vec<String> {
    extract_datetime_strings(query)
        .iter()
        .filter_map(|s| crate::service::time::parse_dt(s))
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .collect()
}

/// Truncate to at most `limit` characters without splitting one.
fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl DocumentRetriever for LocalDocumentIndex {
    async fn retrieve(&self, query: &str) -> Result<Retrieval> {
        let docs = self.documents().await?;
        let query_tokens = tokenize(query);
        let dates = query_dates(query);

        let mut ranked: Vec<(f64, &IndexedDocument)> = docs
            .iter()
            .map(|d| (Self::score(&query_tokens, &dates, d), d))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        ranked.truncate(self.top_k);

        let mut context = String::new();
        for (_, doc) in &ranked {
            context.push_str(&format!("[{}]\n{}\n\n", doc.id, doc.text.trim()));
        }
        let context = truncate_chars(&context, self.limit_context_chars).to_string();

        let docs: Vec<ScoredDocument> = ranked
            .into_iter()
            .map(|(score, d)| ScoredDocument {
                id: d.id.clone(),
                schema: d.schema.to_string(),
                score,
            })
            .collect();
        debug!(
            "[rag] {} candidate(s), top score {:.2}",
            docs.len(),
            docs.first().map(|d| d.score).unwrap_or(0.0)
        );
        Ok(Retrieval { docs, context })
    }
}
