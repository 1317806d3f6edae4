use std::collections::HashSet;

use hotpulse_core::Record;
use serde::Serialize;
use tracing::{info, warn};

/// Result of collapsing records to one per identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    /// Survivors, in input order.
    pub records: Vec<Record>,
    pub stats: DedupStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub input: usize,
    pub kept: usize,
    pub duplicates_dropped: usize,
    /// Records with a blank identity key. Each is kept on its own.
    pub keyless: usize,
}

impl std::fmt::Display for DedupStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Deduplication Complete ===")?;
        writeln!(f, "Input records:      {}", self.input)?;
        writeln!(f, "Kept:               {}", self.kept)?;
        writeln!(f, "Duplicates dropped: {}", self.duplicates_dropped)?;
        writeln!(f, "Keyless records:    {}", self.keyless)
    }
}

/// Keep the first record for each identity key and drop later ones outright.
///
/// Keys compare exactly after trimming. Blank keys never match each other.
pub fn dedup(records: Vec<Record>) -> DedupOutcome {
    let input = records.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(input);
    let mut keyless = 0;

    let survivors: Vec<Record> = records
        .into_iter()
        .filter(|record| {
            let key = record.identity_key();
            if key.is_empty() {
                keyless += 1;
                return true;
            }
            seen.insert(key.to_string())
        })
        .collect();

    let stats = DedupStats {
        input,
        kept: survivors.len(),
        duplicates_dropped: input - survivors.len(),
        keyless,
    };

    if keyless > 0 {
        warn!(keyless, "Records with blank identity key kept without deduplication");
    }
    info!(
        input,
        kept = stats.kept,
        dropped = stats.duplicates_dropped,
        "Deduplicated records"
    );

    DedupOutcome {
        records: survivors,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, content: &str) -> Record {
        Record::new(id, content)
    }

    #[test]
    fn first_occurrence_wins() {
        let outcome = dedup(vec![rec("1", "hello"), rec("1", "dup"), rec("2", "world")]);
        assert_eq!(outcome.records, vec![rec("1", "hello"), rec("2", "world")]);
        assert_eq!(outcome.stats.duplicates_dropped, 1);
    }

    #[test]
    fn keys_compare_after_trimming() {
        let outcome = dedup(vec![rec("7", "a"), rec(" 7 ", "b"), rec("70", "c")]);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].content, "a");
        assert_eq!(outcome.records[1].content, "c");
    }

    #[test]
    fn blank_keys_are_not_merged() {
        let outcome = dedup(vec![rec("", "a"), rec("  ", "b"), rec("1", "c")]);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.stats.keyless, 2);
        assert_eq!(outcome.stats.duplicates_dropped, 0);
    }

    #[test]
    fn output_length_equals_distinct_keys_and_order_is_kept() {
        let ids = ["c", "a", "c", "b", "a", "d", "b"];
        let records: Vec<Record> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| rec(id, &i.to_string()))
            .collect();

        let outcome = dedup(records);
        let kept: Vec<(&str, &str)> = outcome
            .records
            .iter()
            .map(|r| (r.id.as_str(), r.content.as_str()))
            .collect();
        assert_eq!(kept, vec![("c", "0"), ("a", "1"), ("b", "3"), ("d", "5")]);
        assert_eq!(outcome.stats.input, 7);
        assert_eq!(outcome.stats.duplicates_dropped, 3);
    }

    #[test]
    fn empty_input() {
        let outcome = dedup(Vec::new());
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.stats, DedupStats::default());
    }
}
