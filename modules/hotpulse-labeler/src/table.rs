//! CSV edges: harvested posts in, labeled tables out.
//!
//! Every CSV written here starts with a UTF-8 BOM so spreadsheet tools
//! detect the encoding of Chinese text.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use hotpulse_core::file_config::ColumnsConfig;
use hotpulse_core::{GroupSummary, HotpulseError, HotpulseResult, LabeledRecord, PostMetrics, Record};
use tracing::{info, warn};

use crate::expand::ExpandedTable;

const BOM: &[u8] = b"\xEF\xBB\xBF";

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read posts from a headered CSV using the configured column names.
///
/// `id` and `content` columns are required; keyword and metric columns are
/// optional.
pub fn read_records(path: &Path, columns: &ColumnsConfig) -> HotpulseResult<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let source_name = path.display().to_string();
    let position = |name: &str| headers.iter().position(|h| h == name);
    let required = |name: &str| {
        position(name).ok_or_else(|| HotpulseError::MissingColumn {
            column: name.to_string(),
            source_name: source_name.clone(),
        })
    };

    let id_col = required(&columns.id)?;
    let content_col = required(&columns.content)?;
    let keyword_col = position(&columns.keyword);
    let likes_col = position(&columns.likes);
    let comments_col = position(&columns.comments);
    let reposts_col = position(&columns.reposts);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let cell = |idx: usize| row.get(idx).unwrap_or_default();
        let metric = |idx: Option<usize>| idx.and_then(|i| parse_count(cell(i)));

        records.push(Record {
            id: cell(id_col).to_string(),
            content: cell(content_col).to_string(),
            keyword: keyword_col.map(|i| cell(i).to_string()),
            metrics: PostMetrics {
                likes: metric(likes_col),
                comments: metric(comments_col),
                reposts: metric(reposts_col),
            },
        });
    }

    info!(path = %path.display(), records = records.len(), "Posts loaded");
    Ok(records)
}

/// Engagement cells arrive as "1,024", "12.0" or blank.
fn parse_count(cell: &str) -> Option<u64> {
    let cleaned: String = cell.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned
        .parse::<u64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn bom_writer(path: &Path) -> HotpulseResult<csv::Writer<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(BOM)?;
    Ok(csv::Writer::from_writer(file))
}

/// Write posts back out with the same column names they were read with.
pub fn write_records(path: &Path, records: &[Record], columns: &ColumnsConfig) -> HotpulseResult<()> {
    let mut writer = bom_writer(path)?;
    writer.write_record([
        &columns.id,
        &columns.content,
        &columns.keyword,
        &columns.likes,
        &columns.comments,
        &columns.reposts,
    ])?;

    let count = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_default();
    for record in records {
        writer.write_record([
            record.id.clone(),
            record.content.clone(),
            record.keyword.clone().unwrap_or_default(),
            count(record.metrics.likes),
            count(record.metrics.comments),
            count(record.metrics.reposts),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the `id, content, label` table.
pub fn write_labeled(path: &Path, records: &[LabeledRecord]) -> HotpulseResult<()> {
    let mut writer = bom_writer(path)?;
    writer.write_record(["id", "content", "label"])?;
    for record in records {
        writer.write_record([&record.id, &record.content, &record.label])?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = records.len(), "Labeled table written");
    Ok(())
}

/// Read an `id, content, label` table (for re-expanding an earlier run).
pub fn read_labeled(path: &Path) -> HotpulseResult<Vec<LabeledRecord>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let source_name = path.display().to_string();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| HotpulseError::MissingColumn {
                column: name.to_string(),
                source_name: source_name.clone(),
            })
    };
    let (id_col, content_col, label_col) = (column("id")?, column("content")?, column("label")?);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let cell = |idx: usize| row.get(idx).unwrap_or_default();
        records.push(LabeledRecord::new(cell(id_col), cell(content_col), cell(label_col)));
    }
    Ok(records)
}

/// Write the expanded variant: base columns plus one column per label key.
pub fn write_expanded(path: &Path, table: &ExpandedTable) -> HotpulseResult<()> {
    let mut writer = bom_writer(path)?;
    writer.write_record(table.header())?;
    for row in table.rows() {
        writer.write_record(row)?;
    }
    writer.flush()?;
    info!(
        path = %path.display(),
        rows = table.len(),
        label_columns = table.label_columns().len(),
        "Expanded table written"
    );
    Ok(())
}

/// Write the map-phase `keyword, micro_analysis` table.
pub fn write_stage1(path: &Path, groups: &[GroupSummary]) -> HotpulseResult<()> {
    let mut writer = bom_writer(path)?;
    writer.write_record(["keyword", "micro_analysis"])?;
    for group in groups {
        writer.write_record([&group.keyword, &group.analysis])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a text artifact, creating parent directories.
pub fn write_text(path: &Path, text: &str) -> HotpulseResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}

/// `labels.csv` → `labels_expanded.csv`.
pub fn expanded_path(path: &Path) -> std::path::PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| {
            warn!(path = %path.display(), "Output path has no file name");
            "output".to_string()
        });
    path.with_file_name(format!("{stem}_expanded.csv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> ColumnsConfig {
        ColumnsConfig::default()
    }

    #[test]
    fn reads_posts_with_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        std::fs::write(
            &path,
            "\u{feff}id,content,keyword,likes\n1,hello,#rain#,\"1,024\"\n2,world,,\n",
        )
        .unwrap();

        let records = read_records(&path, &columns()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].keyword.as_deref(), Some("#rain#"));
        assert_eq!(records[0].metrics.likes, Some(1024));
        assert_eq!(records[0].metrics.comments, None);
        assert_eq!(records[1].group_key(), None);
    }

    #[test]
    fn missing_content_column_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        std::fs::write(&path, "id,text\n1,hello\n").unwrap();

        let err = read_records(&path, &columns()).unwrap_err();
        assert!(err.is_config());
        assert!(matches!(err, HotpulseError::MissingColumn { ref column, .. } if column == "content"));
    }

    #[test]
    fn labeled_table_starts_with_bom_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/labels.csv");
        let records = vec![LabeledRecord::new("1", "下雨了, 很大", "{\"topic\":\"rain\"}")];

        write_labeled(&path, &records).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(BOM));

        let back = read_labeled(&path).unwrap();
        assert_eq!(back[0].content, "下雨了, 很大");
        assert_eq!(back[0].parsed.as_ref().unwrap()["topic"], "rain");
    }

    #[test]
    fn parse_count_handles_spreadsheet_formats() {
        assert_eq!(parse_count("12"), Some(12));
        assert_eq!(parse_count("12.0"), Some(12));
        assert_eq!(parse_count(" 3,400 "), Some(3400));
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_count("n/a"), None);
    }

    #[test]
    fn expanded_path_appends_suffix() {
        assert_eq!(
            expanded_path(Path::new("data/labels.csv")),
            Path::new("data/labels_expanded.csv")
        );
    }
}
