//! Rejoin asynchronous batch results to the posts they were requested for.
//!
//! Result lines arrive in any order and their envelope layout depends on the
//! provider (and sometimes on the provider's mood). The answer is located by
//! trying an ordered list of [`AnswerExtractor`]s; the first one that yields
//! a non-empty string wins.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use hotpulse_core::{ExtractionStatus, HotpulseResult, LabeledRecord, Record, ResultEnvelope};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::run_log::{EventKind, RunLog};

// =============================================================================
// Answer extraction
// =============================================================================

/// Pulls the model's answer out of one decoded result line.
pub trait AnswerExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// The answer, or `None` if this layout does not match.
    fn extract(&self, payload: &Value) -> Option<String>;
}

/// Extractor for a layout where the answer is a string at a fixed JSON
/// pointer.
#[derive(Debug, Clone)]
pub struct PointerExtractor {
    name: &'static str,
    pointer: &'static str,
}

impl PointerExtractor {
    pub const fn new(name: &'static str, pointer: &'static str) -> Self {
        Self { name, pointer }
    }
}

impl AnswerExtractor for PointerExtractor {
    fn name(&self) -> &str {
        self.name
    }

    fn extract(&self, payload: &Value) -> Option<String> {
        payload
            .pointer(self.pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }
}

/// Known layouts, most common first.
pub fn default_extractors() -> Vec<Box<dyn AnswerExtractor>> {
    vec![
        // DashScope batch output
        Box::new(PointerExtractor::new("dashscope_result", "/result/message/content")),
        // OpenAI batch output
        Box::new(PointerExtractor::new(
            "openai_batch",
            "/response/body/choices/0/message/content",
        )),
        // Bare chat-completions response
        Box::new(PointerExtractor::new("chat_completion", "/choices/0/message/content")),
        // DashScope native generation, message and text formats
        Box::new(PointerExtractor::new(
            "dashscope_output_message",
            "/output/choices/0/message/content",
        )),
        Box::new(PointerExtractor::new("dashscope_output_text", "/output/text")),
    ]
}

// =============================================================================
// Reconciler
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Non-blank lines ingested.
    pub total_lines: usize,
    pub decoded: usize,
    pub decode_failures: usize,
    pub extraction_misses: usize,
    pub unknown_ids: usize,
    /// Posts no decoded line answered; emitted with an empty label.
    pub missing_results: usize,
}

impl ReconcileStats {
    pub fn failures(&self) -> usize {
        self.decode_failures + self.extraction_misses + self.unknown_ids + self.missing_results
    }
}

impl std::fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Reconciliation Complete ===")?;
        writeln!(f, "Result lines:       {}", self.total_lines)?;
        writeln!(f, "Decoded:            {}", self.decoded)?;
        writeln!(f, "Decode failures:    {}", self.decode_failures)?;
        writeln!(f, "Extraction misses:  {}", self.extraction_misses)?;
        writeln!(f, "Unknown ids:        {}", self.unknown_ids)?;
        writeln!(f, "Missing results:    {}", self.missing_results)?;
        writeln!(f, "Total failures:     {}", self.failures())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// One per decoded line in result-stream order, then one per post that
    /// got no result, in post order.
    pub labeled: Vec<LabeledRecord>,
    pub stats: ReconcileStats,
}

pub struct Reconciler {
    extractors: Vec<Box<dyn AnswerExtractor>>,
    corpus: HashMap<String, String>,
    /// Identity keys in first-seen post order.
    order: Vec<String>,
}

impl Reconciler {
    /// Reconciler over the deduplicated records, with the default extractors.
    pub fn new(records: &[Record]) -> Self {
        Self::with_extractors(records, default_extractors())
    }

    pub fn with_extractors(records: &[Record], extractors: Vec<Box<dyn AnswerExtractor>>) -> Self {
        let mut corpus = HashMap::with_capacity(records.len());
        let mut order = Vec::with_capacity(records.len());
        for record in records {
            let key = record.identity_key();
            if !corpus.contains_key(key) {
                corpus.insert(key.to_string(), record.content.clone());
                order.push(key.to_string());
            }
        }
        Self {
            extractors,
            corpus,
            order,
        }
    }

    /// Append a layout to the end of the extractor order.
    pub fn push_extractor(&mut self, extractor: Box<dyn AnswerExtractor>) {
        self.extractors.push(extractor);
    }

    /// Decode one line into an envelope. Never fails: problems are recorded
    /// in the envelope status.
    pub fn ingest_line(&self, line_no: usize, line: &str) -> ResultEnvelope {
        let payload: Value = match serde_json::from_str(line) {
            Ok(value @ Value::Object(_)) => value,
            Ok(other) => {
                return ResultEnvelope::decode_failed(
                    line_no,
                    format!("expected a JSON object, got {}", json_kind(&other)),
                )
            }
            Err(e) => return ResultEnvelope::decode_failed(line_no, e.to_string()),
        };

        let custom_id = match payload.get("custom_id") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        let answer = self
            .extractors
            .iter()
            .find_map(|extractor| extractor.extract(&payload));

        let (status, answer) = match answer {
            Some(answer) => (ExtractionStatus::Success, answer),
            None => (ExtractionStatus::ExtractionFailed, String::new()),
        };

        ResultEnvelope {
            line_no,
            custom_id,
            payload,
            status,
            answer,
            error: None,
        }
    }

    /// Decode one raw line. Bytes that are not UTF-8 are a decode failure
    /// like any other malformed line.
    pub fn ingest_bytes(&self, line_no: usize, bytes: &[u8]) -> ResultEnvelope {
        match std::str::from_utf8(bytes) {
            Ok(line) => self.ingest_line(line_no, line.trim_start_matches('\u{feff}')),
            Err(e) => ResultEnvelope::decode_failed(line_no, e.to_string()),
        }
    }

    /// Reconcile a whole JSON-lines stream. Only I/O errors abort.
    pub fn reconcile<R: BufRead>(&self, reader: R, log: &mut RunLog) -> HotpulseResult<Reconciliation> {
        let mut stats = ReconcileStats::default();
        let mut labeled = Vec::new();
        let mut answered: HashSet<String> = HashSet::new();

        for (idx, line) in reader.split(b'\n').enumerate() {
            let line = line?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let line_no = idx + 1;
            stats.total_lines += 1;

            let envelope = self.ingest_bytes(line_no, &line);
            match envelope.status {
                ExtractionStatus::DecodeFailed => {
                    stats.decode_failures += 1;
                    let error = envelope.error.unwrap_or_default();
                    warn!(line_no, error = error.as_str(), "Result line could not be decoded");
                    log.log(EventKind::DecodeFailed { line_no, error });
                    continue;
                }
                ExtractionStatus::ExtractionFailed => {
                    stats.extraction_misses += 1;
                    warn!(line_no, custom_id = envelope.custom_id.as_str(), "No answer found in result line");
                    log.log(EventKind::ExtractionMiss {
                        line_no,
                        custom_id: envelope.custom_id.clone(),
                    });
                }
                ExtractionStatus::Success => {}
            }
            stats.decoded += 1;

            let content = match self.corpus.get(&envelope.custom_id) {
                Some(content) => {
                    answered.insert(envelope.custom_id.clone());
                    content.clone()
                }
                None => {
                    stats.unknown_ids += 1;
                    warn!(line_no, custom_id = envelope.custom_id.as_str(), "Result id not in source posts");
                    log.log(EventKind::UnknownId {
                        line_no,
                        custom_id: envelope.custom_id.clone(),
                    });
                    String::new()
                }
            };

            labeled.push(LabeledRecord::new(envelope.custom_id, content, envelope.answer));
        }

        for id in self.order.iter().filter(|id| !answered.contains(*id)) {
            stats.missing_results += 1;
            log.log(EventKind::MissingResult { id: id.clone() });
            let content = self.corpus.get(id).cloned().unwrap_or_default();
            labeled.push(LabeledRecord::new(id.clone(), content, String::new()));
        }
        if stats.missing_results > 0 {
            warn!(missing = stats.missing_results, "Posts without a result line kept with empty labels");
        }

        if stats.decoded == 0 {
            warn!(total_lines = stats.total_lines, "No result lines could be reconciled");
        }
        info!(
            total = stats.total_lines,
            decoded = stats.decoded,
            decode_failures = stats.decode_failures,
            extraction_misses = stats.extraction_misses,
            unknown_ids = stats.unknown_ids,
            missing_results = stats.missing_results,
            "Reconciliation finished"
        );

        Ok(Reconciliation { labeled, stats })
    }

    /// Reconcile the result file at `path`.
    pub fn reconcile_file(&self, path: &Path, log: &mut RunLog) -> HotpulseResult<Reconciliation> {
        let file = std::fs::File::open(path)?;
        self.reconcile(std::io::BufReader::new(file), log)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
