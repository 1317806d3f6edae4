//! Small-sample interactive labeling, used to check prompts before paying
//! for a full batch.

use std::sync::Arc;

use ai_client::{truncate_chars, ChatAgent};
use futures::stream::{self, StreamExt};
use hotpulse_core::{HotpulseError, HotpulseResult, LabeledRecord, LabelingPrompts, Record};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};

use crate::run_log::{EventKind, RunLog};

const FAILURE_DETAIL_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpotCheckStats {
    pub population: usize,
    pub sampled: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl std::fmt::Display for SpotCheckStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Spot Check Complete ===")?;
        writeln!(f, "Population:  {}", self.population)?;
        writeln!(f, "Sampled:     {}", self.sampled)?;
        writeln!(f, "Succeeded:   {}", self.succeeded)?;
        writeln!(f, "Failed:      {}", self.failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotCheckOutcome {
    /// One per sampled record, in sample order.
    pub labeled: Vec<LabeledRecord>,
    pub stats: SpotCheckStats,
}

/// Label recorded for a post whose calls all failed.
pub fn failure_label(error: &str) -> String {
    format!("Error: {}", truncate_chars(error, FAILURE_DETAIL_CHARS))
}

/// Pick `size` records at random, reproducibly for a given seed. Picked
/// records keep their input order. A size at or above the population
/// returns everything.
pub fn sample_records(records: &[Record], size: usize, seed: u64) -> Vec<Record> {
    if size >= records.len() {
        return records.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, records.len(), size).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| records[i].clone()).collect()
}

pub struct SpotChecker {
    agent: Arc<dyn ChatAgent>,
    prompts: LabelingPrompts,
    temperature: f32,
    concurrency: usize,
}

impl SpotChecker {
    /// `agent` is expected to carry its own retry policy (see
    /// [`crate::retry::RetryingClient`]).
    pub fn new(agent: Arc<dyn ChatAgent>, prompts: LabelingPrompts, temperature: f32) -> Self {
        Self {
            agent,
            prompts,
            temperature,
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Label every record in `sample`. Per-record failures become a failure
    /// label; only prompt rendering errors abort.
    pub async fn run(
        &self,
        sample: &[Record],
        population: usize,
        log: &mut RunLog,
    ) -> HotpulseResult<SpotCheckOutcome> {
        let total = sample.len();
        info!(sampled = total, population, concurrency = self.concurrency, "Spot check started");

        let results: Vec<HotpulseResult<(LabeledRecord, bool)>> = stream::iter(sample.iter().enumerate())
            .map(|(i, record)| async move {
                let messages = self.prompts.messages(&record.content)?;
                let (label, success) = match self.agent.chat(&messages, self.temperature).await {
                    Ok(reply) => (reply, true),
                    Err(e) => {
                        warn!(id = record.id.as_str(), error = %e, "Labeling failed, recording failure marker");
                        (failure_label(&e.to_string()), false)
                    }
                };
                info!(done = i + 1, total, id = record.id.as_str(), success, "Post labeled");
                Ok::<_, HotpulseError>((
                    LabeledRecord::new(record.identity_key(), record.content.clone(), label),
                    success,
                ))
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut stats = SpotCheckStats {
            population,
            sampled: total,
            ..Default::default()
        };
        let mut labeled = Vec::with_capacity(total);
        for result in results {
            let (record, success) = result?;
            if success {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
            log.log(EventKind::LabelCall {
                id: record.id.clone(),
                success,
            });
            labeled.push(record);
        }

        Ok(SpotCheckOutcome { labeled, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotpulse_core::PromptTemplate;

    use crate::testing::ScriptedAgent;

    fn prompts() -> LabelingPrompts {
        let toml = toml::Value::Table(Default::default());
        LabelingPrompts::new(
            PromptTemplate::new("labeling", "Label posts.", &toml, &[]).unwrap(),
            PromptTemplate::new("labeling_user", "{{content}}", &toml, &["content"]).unwrap(),
            0,
        )
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(i.to_string(), format!("post {i}")))
            .collect()
    }

    #[test]
    fn sampling_is_reproducible_for_a_seed() {
        let records = records(100);
        let a = sample_records(&records, 10, 42);
        let b = sample_records(&records, 10, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);

        let ids: Vec<usize> = a.iter().map(|r| r.id.parse().unwrap()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn oversized_sample_returns_everything() {
        let records = records(3);
        assert_eq!(sample_records(&records, 20, 42), records);
    }

    #[test]
    fn failure_label_keeps_first_thirty_chars() {
        let label = failure_label(&"x".repeat(80));
        assert_eq!(label, format!("Error: {}", "x".repeat(30)));
    }

    #[tokio::test]
    async fn failed_record_gets_marker_and_run_continues() {
        let agent = Arc::new(ScriptedAgent::new("{\"topic\": \"ok\"}").fail_on("post 1"));
        let checker = SpotChecker::new(agent, prompts(), 0.3);
        let mut log = RunLog::new("spot-check");

        let outcome = checker.run(&records(3), 3, &mut log).await.unwrap();
        assert_eq!(outcome.labeled.len(), 3);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.stats.succeeded, 2);
        assert!(outcome.labeled[1].label.starts_with("Error: "));
        assert_eq!(outcome.labeled[2].label, "{\"topic\": \"ok\"}");
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn concurrent_run_keeps_sample_order() {
        let agent = Arc::new(
            ScriptedAgent::new("default")
                .on("post 0", "zero")
                .on("post 2", "two"),
        );
        let checker = SpotChecker::new(agent, prompts(), 0.3).with_concurrency(4);
        let mut log = RunLog::new("spot-check");

        let outcome = checker.run(&records(3), 3, &mut log).await.unwrap();
        let labels: Vec<&str> = outcome.labeled.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["zero", "default", "two"]);
    }
}
