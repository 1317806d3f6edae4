use ai_client::openai::types::{ChatRequest, WireMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Record
// =============================================================================

/// Engagement counts harvested alongside a post. Absent columns or
/// unparseable cells stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    pub likes: Option<u64>,
    pub comments: Option<u64>,
    pub reposts: Option<u64>,
}

/// One harvested post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub content: String,
    /// Topic keyword the post was harvested under.
    pub keyword: Option<String>,
    #[serde(default)]
    pub metrics: PostMetrics,
}

impl Record {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            keyword: None,
            metrics: PostMetrics::default(),
        }
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    /// Identity key used for deduplication and result correlation.
    pub fn identity_key(&self) -> &str {
        self.id.trim()
    }

    /// Group key for summarization; blank keywords count as no group.
    pub fn group_key(&self) -> Option<&str> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

// =============================================================================
// InferenceRequest
// =============================================================================

/// A rendered labeling request for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    /// Correlation id: the record's identity key.
    pub custom_id: String,
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
}

impl InferenceRequest {
    /// Chat-completions body carried by the request line.
    pub fn body(&self) -> ChatRequest {
        ChatRequest::new(&self.model)
            .message(WireMessage::system(&self.system))
            .message(WireMessage::user(&self.user))
            .temperature(self.temperature)
    }
}

// =============================================================================
// ResultEnvelope
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Success,
    ExtractionFailed,
    DecodeFailed,
}

/// One ingested line of the batch result stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    /// 1-based line number in the result file.
    pub line_no: usize,
    pub custom_id: String,
    /// Decoded line, or `Value::Null` when decoding failed.
    pub payload: Value,
    pub status: ExtractionStatus,
    /// Extracted answer; empty unless `status` is `Success`.
    pub answer: String,
    pub error: Option<String>,
}

impl ResultEnvelope {
    pub fn decode_failed(line_no: usize, error: impl Into<String>) -> Self {
        Self {
            line_no,
            custom_id: String::new(),
            payload: Value::Null,
            status: ExtractionStatus::DecodeFailed,
            answer: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_decoded(&self) -> bool {
        self.status != ExtractionStatus::DecodeFailed
    }
}

// =============================================================================
// LabeledRecord
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub id: String,
    /// Original post text; empty when the id was not in the source corpus.
    pub content: String,
    /// Raw model answer.
    pub label: String,
    /// Label parsed as JSON, when it is a JSON object.
    #[serde(skip)]
    pub parsed: Option<Value>,
}

impl LabeledRecord {
    pub fn new(id: impl Into<String>, content: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        let parsed = parse_label(&label);
        Self {
            id: id.into(),
            content: content.into(),
            label,
            parsed,
        }
    }
}

/// Parse a label as a JSON object, tolerating markdown code fences.
pub fn parse_label(label: &str) -> Option<Value> {
    let body = ai_client::strip_code_blocks(label);
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

// =============================================================================
// Summaries
// =============================================================================

/// Map-phase output for one keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub keyword: String,
    /// Concatenated (and possibly truncated) post text sent to the model.
    #[serde(skip)]
    pub source_text: String,
    pub analysis: String,
    #[serde(skip)]
    pub failed: bool,
}

/// Header line that introduces one keyword's facts.
pub fn summary_header(keyword: &str) -> String {
    format!("=== Fact Summary for Keyword 【{keyword}】 ===")
}

/// Join group summaries, in order, into the reduce-phase input.
pub fn combine_summaries(groups: &[GroupSummary]) -> String {
    groups
        .iter()
        .map(|g| format!("{}\n{}\n\n", summary_header(&g.keyword), g.analysis))
        .collect()
}

pub const GLOBAL_BANNER: &str =
    "################################################################\n\
     # PART 1: GLOBAL CORRELATION ANALYSIS\n\
     ################################################################";

pub const FACTS_BANNER: &str =
    "################################################################\n\
     # PART 2: PER-KEYWORD FACT SUMMARIES\n\
     ################################################################";

/// Layered output of a finalized summary run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeArtifact {
    pub global_analysis: String,
    pub groups: Vec<GroupSummary>,
}

impl KnowledgeArtifact {
    /// Global section first, per-keyword facts second.
    pub fn render(&self) -> String {
        format!(
            "{GLOBAL_BANNER}\n\n{}\n\n\n{FACTS_BANNER}\n\n{}",
            self.global_analysis.trim_end(),
            combine_summaries(&self.groups)
        )
    }
}
