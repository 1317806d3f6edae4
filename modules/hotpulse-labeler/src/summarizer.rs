//! Two-phase keyword summary.
//!
//! Map: each keyword's posts are joined and analyzed on their own. A group
//! that fails gets a placeholder and the phase carries on.
//! Reduce: every group summary, placeholders included, goes into one global
//! correlation call. If that call fails no knowledge artifact is written,
//! but the map-phase table already on disk stays.
//!
//! ```text
//! Idle → MappingGroups → ReducingGlobal → Finalized
//!             ↓                ↓
//!           Failed           Failed
//! ```

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use ai_client::ChatAgent;
use hotpulse_core::{
    combine_summaries, truncate_content, GroupSummary, HotpulseError, HotpulseResult,
    KnowledgeArtifact, Record, SummaryPrompts,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::run_log::{EventKind, RunLog};
use crate::table;

/// Joins posts within one keyword group.
pub const POST_SEPARATOR: &str = "\n\n【---下一条微博---】\n\n";

/// Stands in for a group whose analysis call failed.
pub const FAILED_ANALYSIS: &str = "(analysis failed)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    MappingGroups,
    ReducingGlobal,
    Finalized,
    Failed,
}

impl Phase {
    fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Idle, Phase::MappingGroups)
                | (Phase::MappingGroups, Phase::ReducingGlobal)
                | (Phase::MappingGroups, Phase::Failed)
                | (Phase::ReducingGlobal, Phase::Finalized)
                | (Phase::ReducingGlobal, Phase::Failed)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::MappingGroups => "mapping_groups",
            Phase::ReducingGlobal => "reducing_global",
            Phase::Finalized => "finalized",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Posts of one keyword, joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostGroup {
    pub keyword: String,
    pub posts: usize,
    pub text: String,
}

/// Partition records by keyword in first-seen order. Records without a
/// keyword are left out; their count is returned alongside.
pub fn group_records(records: &[Record]) -> (Vec<PostGroup>, usize) {
    let mut groups: Vec<PostGroup> = Vec::new();
    let mut index: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    let mut ungrouped = 0;

    for record in records {
        let Some(keyword) = record.group_key() else {
            ungrouped += 1;
            continue;
        };
        match index.get(keyword) {
            Some(&i) => {
                let group = &mut groups[i];
                group.text.push_str(POST_SEPARATOR);
                group.text.push_str(&record.content);
                group.posts += 1;
            }
            None => {
                index.insert(keyword, groups.len());
                groups.push(PostGroup {
                    keyword: keyword.to_string(),
                    posts: 1,
                    text: record.content.clone(),
                });
            }
        }
    }

    (groups, ungrouped)
}

// ---------------------------------------------------------------------------
// Summarizer
// ---------------------------------------------------------------------------

/// Where the summary writes its outputs.
#[derive(Debug, Clone)]
pub struct SummaryOutputs {
    /// Map-phase `keyword, micro_analysis` table.
    pub stage1: PathBuf,
    /// Reduce-phase analysis alone, as markdown.
    pub report: PathBuf,
    /// Layered knowledge artifact.
    pub knowledge: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummaryStats {
    pub records: usize,
    pub ungrouped: usize,
    pub groups: usize,
    pub groups_truncated: usize,
    pub group_failures: usize,
    pub reduce_failed: bool,
}

impl std::fmt::Display for SummaryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Summary Run Complete ===")?;
        writeln!(f, "Records:            {}", self.records)?;
        writeln!(f, "Without keyword:    {}", self.ungrouped)?;
        writeln!(f, "Keyword groups:     {}", self.groups)?;
        writeln!(f, "Groups truncated:   {}", self.groups_truncated)?;
        writeln!(f, "Group failures:     {}", self.group_failures)?;
        writeln!(
            f,
            "Global analysis:    {}",
            if self.reduce_failed { "FAILED" } else { "ok" }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub phase: Phase,
    pub groups: Vec<GroupSummary>,
    /// Present only when the run finalized.
    pub artifact: Option<KnowledgeArtifact>,
    pub failure: Option<String>,
    pub stats: SummaryStats,
}

pub struct Summarizer {
    agent: Arc<dyn ChatAgent>,
    prompts: SummaryPrompts,
    micro_temperature: f32,
    macro_temperature: f32,
    outputs: SummaryOutputs,
    phase: Phase,
}

impl Summarizer {
    /// `agent` is expected to carry its own retry policy (see
    /// [`crate::retry::RetryingClient`]).
    pub fn new(
        agent: Arc<dyn ChatAgent>,
        prompts: SummaryPrompts,
        micro_temperature: f32,
        macro_temperature: f32,
        outputs: SummaryOutputs,
    ) -> Self {
        Self {
            agent,
            prompts,
            micro_temperature,
            macro_temperature,
            outputs,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, next: Phase, log: &mut RunLog) -> HotpulseResult<()> {
        if !self.phase.can_advance_to(next) {
            return Err(HotpulseError::Config(format!(
                "summarizer cannot move from {} to {next}",
                self.phase
            )));
        }
        debug!(from = %self.phase, to = %next, "Summarizer phase change");
        self.phase = next;
        log.log(EventKind::PhaseChanged {
            phase: next.to_string(),
        });
        Ok(())
    }

    /// Run map then reduce over `records`. A reduce failure is reported in
    /// the outcome; I/O errors are returned.
    pub async fn run(&mut self, records: &[Record], log: &mut RunLog) -> HotpulseResult<SummaryOutcome> {
        self.advance(Phase::MappingGroups, log)?;

        let (post_groups, ungrouped) = group_records(records);
        let mut stats = SummaryStats {
            records: records.len(),
            ungrouped,
            groups: post_groups.len(),
            ..Default::default()
        };
        if ungrouped > 0 {
            warn!(ungrouped, "Records without keyword left out of the summary");
        }

        if post_groups.is_empty() {
            self.advance(Phase::Failed, log)?;
            stats.reduce_failed = true;
            warn!("No keyword groups to summarize");
            return Ok(SummaryOutcome {
                phase: self.phase,
                groups: Vec::new(),
                artifact: None,
                failure: Some("no records with a keyword".to_string()),
                stats,
            });
        }

        let groups = self.map_groups(post_groups, &mut stats, log).await?;

        if let Err(e) = table::write_stage1(&self.outputs.stage1, &groups) {
            self.advance(Phase::Failed, log)?;
            return Err(e);
        }
        info!(path = %self.outputs.stage1.display(), groups = groups.len(), "Keyword analysis saved");
        log.log(EventKind::FileWritten {
            path: self.outputs.stage1.display().to_string(),
        });

        self.advance(Phase::ReducingGlobal, log)?;
        let combined = combine_summaries(&groups);
        let messages = self.prompts.macro_messages(&combined)?;
        info!(groups = groups.len(), chars = combined.chars().count(), "Global correlation analysis started");

        let global_analysis = match self.agent.chat(&messages, self.macro_temperature).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Global analysis failed, no report written");
                log.log(EventKind::ReduceFinished {
                    groups: groups.len(),
                    success: false,
                });
                self.advance(Phase::Failed, log)?;
                stats.reduce_failed = true;
                return Ok(SummaryOutcome {
                    phase: self.phase,
                    groups,
                    artifact: None,
                    failure: Some(format!("global analysis failed: {e}")),
                    stats,
                });
            }
        };
        log.log(EventKind::ReduceFinished {
            groups: groups.len(),
            success: true,
        });

        let artifact = KnowledgeArtifact {
            global_analysis,
            groups: groups.clone(),
        };
        table::write_text(&self.outputs.report, &artifact.global_analysis)?;
        table::write_text(&self.outputs.knowledge, &artifact.render())?;
        for path in [&self.outputs.report, &self.outputs.knowledge] {
            info!(path = %path.display(), "Summary artifact written");
            log.log(EventKind::FileWritten {
                path: path.display().to_string(),
            });
        }
        self.advance(Phase::Finalized, log)?;

        Ok(SummaryOutcome {
            phase: self.phase,
            groups,
            artifact: Some(artifact),
            failure: None,
            stats,
        })
    }

    async fn map_groups(
        &self,
        post_groups: Vec<PostGroup>,
        stats: &mut SummaryStats,
        log: &mut RunLog,
    ) -> HotpulseResult<Vec<GroupSummary>> {
        let total = post_groups.len();
        let mut summaries = Vec::with_capacity(total);

        for (i, group) in post_groups.into_iter().enumerate() {
            let source = truncate_content(&group.text, self.prompts.max_text_length());
            let truncated = matches!(source, Cow::Owned(_));
            let source = source.into_owned();
            if truncated {
                stats.groups_truncated += 1;
                debug!(keyword = group.keyword.as_str(), "Group text truncated");
            }

            let messages = self.prompts.micro_messages(&group.keyword, &source)?;
            let (analysis, failed) = match self.agent.chat(&messages, self.micro_temperature).await {
                Ok(text) => (text, false),
                Err(e) => {
                    warn!(keyword = group.keyword.as_str(), error = %e, "Keyword analysis failed");
                    stats.group_failures += 1;
                    (FAILED_ANALYSIS.to_string(), true)
                }
            };

            info!(
                done = i + 1,
                total,
                keyword = group.keyword.as_str(),
                posts = group.posts,
                success = !failed,
                "Keyword analyzed"
            );
            log.log(EventKind::GroupAnalyzed {
                keyword: group.keyword.clone(),
                posts: group.posts,
                source_chars: source.chars().count(),
                success: !failed,
            });

            summaries.push(GroupSummary {
                keyword: group.keyword,
                source_text: source,
                analysis,
                failed,
            });
        }

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotpulse_core::{PromptTemplate, TRUNCATION_MARKER};

    use crate::testing::{post, ScriptedAgent};

    fn prompts(max_text_length: usize) -> SummaryPrompts {
        let toml = toml::Value::Table(Default::default());
        SummaryPrompts::new(
            PromptTemplate::new("system", "Analyst.", &toml, &[]).unwrap(),
            PromptTemplate::new("keyword", "{{keyword}}: {{content}}", &toml, &["keyword", "content"])
                .unwrap(),
            PromptTemplate::new("correlation", "{{all_summaries}}", &toml, &["all_summaries"]).unwrap(),
            max_text_length,
        )
    }

    fn summarizer(dir: &std::path::Path, max_text_length: usize) -> Summarizer {
        let outputs = SummaryOutputs {
            stage1: dir.join("stage1.csv"),
            report: dir.join("report.md"),
            knowledge: dir.join("knowledge.txt"),
        };
        Summarizer::new(
            Arc::new(ScriptedAgent::new("ok")),
            prompts(max_text_length),
            0.3,
            0.5,
            outputs,
        )
    }

    #[tokio::test]
    async fn truncation_is_counted_even_when_byte_length_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let text = "x".repeat(10 + TRUNCATION_MARKER.len());
        let records = vec![post("1", "K", &text), post("2", "S", "short")];

        let outcome = summarizer(dir.path(), 10)
            .run(&records, &mut RunLog::new("test"))
            .await
            .unwrap();

        assert_eq!(outcome.stats.groups_truncated, 1);
        assert_eq!(outcome.groups[0].source_text.len(), text.len());
        assert_ne!(outcome.groups[0].source_text, text);
        assert_eq!(outcome.groups[1].source_text, "short");
    }

    #[test]
    fn groups_follow_first_seen_order() {
        let records = vec![
            post("1", "A", "a1"),
            post("2", "C", "c1"),
            post("3", "A", "a2"),
            post("4", "B", "b1"),
        ];
        let (groups, ungrouped) = group_records(&records);

        let keys: Vec<&str> = groups.iter().map(|g| g.keyword.as_str()).collect();
        assert_eq!(keys, vec!["A", "C", "B"]);
        assert_eq!(groups[0].text, format!("a1{POST_SEPARATOR}a2"));
        assert_eq!(groups[0].posts, 2);
        assert_eq!(ungrouped, 0);
    }

    #[test]
    fn records_without_keyword_are_counted_out() {
        let records = vec![Record::new("1", "x"), post("2", " ", "y"), post("3", "K", "z")];
        let (groups, ungrouped) = group_records(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(ungrouped, 2);
    }

    #[test]
    fn only_documented_transitions_are_allowed() {
        assert!(Phase::Idle.can_advance_to(Phase::MappingGroups));
        assert!(Phase::MappingGroups.can_advance_to(Phase::Failed));
        assert!(Phase::ReducingGlobal.can_advance_to(Phase::Finalized));
        assert!(!Phase::Idle.can_advance_to(Phase::Finalized));
        assert!(!Phase::Finalized.can_advance_to(Phase::MappingGroups));
        assert!(!Phase::Failed.can_advance_to(Phase::ReducingGlobal));
    }
}
