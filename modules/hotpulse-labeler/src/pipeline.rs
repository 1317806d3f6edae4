//! One method per CLI command. Paths in the config are resolved against the
//! config file's directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ai_client::ChatAgent;
use hotpulse_core::file_config::{load_config, load_toml_value};
use hotpulse_core::{FileConfig, HotpulseResult, PromptRegistry, Record};
use serde::Serialize;
use tracing::info;

use crate::batch::{build_requests, write_batch_file};
use crate::context::inject_context_file;
use crate::dedup::{dedup, DedupStats};
use crate::expand::{expand_labels, ExpandStats};
use crate::reconcile::{ReconcileStats, Reconciler};
use crate::run_log::{EventKind, RunLog};
use crate::spot_check::{sample_records, SpotCheckStats, SpotChecker};
use crate::summarizer::{SummaryOutcome, SummaryOutputs, Summarizer};
use crate::table;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub dedup: DedupStats,
    pub lines: usize,
}

impl std::fmt::Display for BatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dedup)?;
        writeln!(f, "\n=== Batch File Complete ===")?;
        writeln!(f, "Request lines:      {}", self.lines)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileRunStats {
    pub reconcile: ReconcileStats,
    pub expand: ExpandStats,
}

impl std::fmt::Display for ReconcileRunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reconcile)?;
        writeln!(f, "Labels unexpanded:  {}", self.expand.unparsed)
    }
}

pub struct Pipeline {
    config: FileConfig,
    config_dir: PathBuf,
    toml_value: toml::Value,
}

impl Pipeline {
    /// Load the TOML config at `path`, or run on defaults from the current
    /// directory when no file is given.
    pub fn load(path: Option<&Path>) -> HotpulseResult<Self> {
        match path {
            Some(path) => {
                let config = load_config(path)?;
                let toml_value = load_toml_value(path)?;
                let config_dir = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                info!(path = %path.display(), "Config file loaded");
                Ok(Self::new(config, config_dir, toml_value))
            }
            None => Ok(Self::new(
                FileConfig::default(),
                PathBuf::from("."),
                toml::Value::Table(Default::default()),
            )),
        }
    }

    pub fn new(config: FileConfig, config_dir: PathBuf, toml_value: toml::Value) -> Self {
        Self {
            config,
            config_dir,
            toml_value,
        }
    }

    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    /// Resolve a configured path against the config directory.
    pub fn path(&self, path: &Path) -> PathBuf {
        self.config_dir.join(path)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.path(&self.config.paths.data_dir)
    }

    pub fn prompts(&self) -> PromptRegistry {
        PromptRegistry::new(&self.config, &self.config_dir, self.toml_value.clone())
    }

    fn read_records(&self, path: &Path, log: &mut RunLog) -> HotpulseResult<Vec<Record>> {
        let records = table::read_records(path, &self.config.columns)?;
        log.log(EventKind::RecordsLoaded {
            path: path.display().to_string(),
            records: records.len(),
        });
        Ok(records)
    }

    fn load_records(&self, path: &Path, log: &mut RunLog) -> HotpulseResult<(Vec<Record>, DedupStats)> {
        let outcome = dedup(self.read_records(path, log)?);
        log.log(EventKind::Deduplicated {
            input: outcome.stats.input,
            kept: outcome.stats.kept,
            dropped: outcome.stats.duplicates_dropped,
        });
        Ok((outcome.records, outcome.stats))
    }

    fn wrote(path: &Path, log: &mut RunLog) {
        log.log(EventKind::FileWritten {
            path: path.display().to_string(),
        });
    }

    /// Deduplicate the post file and write the survivors.
    pub fn dedup(&self, log: &mut RunLog) -> HotpulseResult<DedupStats> {
        let (records, stats) = self.load_records(&self.path(&self.config.paths.posts), log)?;
        let output = self.path(&self.config.paths.deduped_posts);
        table::write_records(&output, &records, &self.config.columns)?;
        Self::wrote(&output, log);
        Ok(stats)
    }

    /// Build the batch request document for every deduplicated post.
    pub fn batch(&self, model: &str, log: &mut RunLog) -> HotpulseResult<BatchStats> {
        let prompts = self.prompts().labeling()?;
        let (records, dedup) = self.load_records(&self.path(&self.config.paths.posts), log)?;

        let requests = build_requests(
            &records,
            model,
            self.config.sampling.labeling_temperature,
            |record| prompts.render(&record.content),
        )?;

        let output = self.path(&self.config.paths.batch_requests);
        let lines = write_batch_file(&output, &requests, self.config.limits.progress_every)?;
        log.log(EventKind::BatchWritten {
            path: output.display().to_string(),
            lines,
        });
        Ok(BatchStats { dedup, lines })
    }

    /// Join the batch result file back to the posts and write both tables.
    pub fn reconcile(&self, log: &mut RunLog) -> HotpulseResult<ReconcileRunStats> {
        let (records, _) = self.load_records(&self.path(&self.config.paths.posts), log)?;
        let results = self.path(&self.config.paths.batch_results);

        let reconciliation = Reconciler::new(&records).reconcile_file(&results, log)?;
        let output = self.path(&self.config.paths.labeled);
        table::write_labeled(&output, &reconciliation.labeled)?;
        Self::wrote(&output, log);

        let expanded = expand_labels(&reconciliation.labeled);
        let expanded_output = table::expanded_path(&output);
        table::write_expanded(&expanded_output, &expanded)?;
        Self::wrote(&expanded_output, log);

        Ok(ReconcileRunStats {
            reconcile: reconciliation.stats,
            expand: expanded.stats(),
        })
    }

    /// Re-expand an existing `id, content, label` table.
    pub fn expand(&self, input: Option<&Path>, log: &mut RunLog) -> HotpulseResult<ExpandStats> {
        let input = input
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.path(&self.config.paths.labeled));
        let labeled = table::read_labeled(&input)?;
        let expanded = expand_labels(&labeled);
        let output = table::expanded_path(&input);
        table::write_expanded(&output, &expanded)?;
        Self::wrote(&output, log);
        Ok(expanded.stats())
    }

    /// Label a reproducible random sample interactively.
    pub async fn spot_check(
        &self,
        agent: Arc<dyn ChatAgent>,
        log: &mut RunLog,
    ) -> HotpulseResult<SpotCheckStats> {
        let prompts = self.prompts().labeling()?;
        let (records, _) = self.load_records(&self.path(&self.config.paths.posts), log)?;
        let sample = sample_records(
            &records,
            self.config.spot_check.sample_size,
            self.config.spot_check.seed,
        );

        let checker = SpotChecker::new(agent, prompts, self.config.sampling.labeling_temperature)
            .with_concurrency(self.config.limits.concurrency);
        let outcome = checker.run(&sample, records.len(), log).await?;

        let output = self.path(&self.config.paths.spot_check);
        table::write_labeled(&output, &outcome.labeled)?;
        Self::wrote(&output, log);
        let expanded_output = table::expanded_path(&output);
        table::write_expanded(&expanded_output, &expand_labels(&outcome.labeled))?;
        Self::wrote(&expanded_output, log);

        Ok(outcome.stats)
    }

    /// Map-reduce summary of the context posts. Posts are grouped as read:
    /// one harvested under several keywords belongs to each of their groups.
    pub async fn summarize(
        &self,
        agent: Arc<dyn ChatAgent>,
        log: &mut RunLog,
    ) -> HotpulseResult<SummaryOutcome> {
        let prompts = self.prompts().summary()?;
        let records = self.read_records(&self.path(&self.config.paths.context_posts), log)?;

        let paths = &self.config.paths;
        let outputs = SummaryOutputs {
            stage1: self.path(&paths.stage1),
            report: self.path(&paths.report),
            knowledge: self.path(&paths.knowledge),
        };
        let mut summarizer = Summarizer::new(
            agent,
            prompts,
            self.config.sampling.micro_temperature,
            self.config.sampling.macro_temperature,
            outputs,
        );
        summarizer.run(&records, log).await
    }

    /// Inject the knowledge artifact (or `source`) into the labeling prompt.
    pub fn inject_context(&self, source: Option<&Path>) -> HotpulseResult<usize> {
        let source = source
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.path(&self.config.paths.knowledge));
        inject_context_file(&self.prompts().labeling_path(), &source)
    }
}
