use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ai_client::openai::types::ChatRequest;
use hotpulse_core::{HotpulseResult, InferenceRequest, Record};
use serde::Serialize;
use tracing::info;

pub const BATCH_METHOD: &str = "POST";
pub const BATCH_URL: &str = "/v1/chat/completions";

/// One line of the batch request document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchLine {
    pub custom_id: String,
    pub method: &'static str,
    pub url: &'static str,
    pub body: ChatRequest,
}

impl From<&InferenceRequest> for BatchLine {
    fn from(request: &InferenceRequest) -> Self {
        Self {
            custom_id: request.custom_id.clone(),
            method: BATCH_METHOD,
            url: BATCH_URL,
            body: request.body(),
        }
    }
}

/// Render one request per record, in input order. The correlation id is the
/// record's identity key.
pub fn build_requests<F>(
    records: &[Record],
    model: &str,
    temperature: f32,
    render: F,
) -> HotpulseResult<Vec<InferenceRequest>>
where
    F: Fn(&Record) -> HotpulseResult<(String, String)>,
{
    records
        .iter()
        .map(|record| {
            let (system, user) = render(record)?;
            Ok(InferenceRequest {
                custom_id: record.identity_key().to_string(),
                system,
                user,
                model: model.to_string(),
                temperature,
            })
        })
        .collect()
}

/// Serialize requests as JSON lines. Returns the number of lines written.
pub fn write_batch<W: Write>(
    mut writer: W,
    requests: &[InferenceRequest],
    progress_every: usize,
) -> HotpulseResult<usize> {
    let total = requests.len();
    for (i, request) in requests.iter().enumerate() {
        serde_json::to_writer(&mut writer, &BatchLine::from(request))?;
        writer.write_all(b"\n")?;

        let done = i + 1;
        if progress_every > 0 && done % progress_every == 0 {
            info!(done, total, "Batch requests written");
        }
    }
    writer.flush()?;
    Ok(total)
}

/// Write the request document to `path`, creating parent directories.
pub fn write_batch_file(
    path: &Path,
    requests: &[InferenceRequest],
    progress_every: usize,
) -> HotpulseResult<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    let lines = write_batch(writer, requests, progress_every)?;
    info!(path = %path.display(), lines, "Batch request file written");
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(record: &Record) -> HotpulseResult<(String, String)> {
        Ok(("Label posts.".to_string(), format!("Post: {}", record.content)))
    }

    #[test]
    fn one_request_per_record_in_order() {
        let records = vec![Record::new(" 1 ", "hello"), Record::new("2", "world")];
        let requests = build_requests(&records, "qwen-plus", 0.3, render).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].custom_id, "1");
        assert_eq!(requests[1].user, "Post: world");
        assert_eq!(requests[1].temperature, 0.3);
    }

    #[test]
    fn lines_follow_batch_request_format() {
        let requests =
            build_requests(&[Record::new("42", "hi")], "qwen-plus", 0.3, render).unwrap();
        let mut out = Vec::new();
        let lines = write_batch(&mut out, &requests, 100).unwrap();
        assert_eq!(lines, 1);

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        let line: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(line["custom_id"], "42");
        assert_eq!(line["method"], "POST");
        assert_eq!(line["url"], "/v1/chat/completions");
        assert_eq!(line["body"]["model"], "qwen-plus");
        assert_eq!(line["body"]["messages"][0]["role"], "system");
        assert_eq!(line["body"]["messages"][0]["content"], "Label posts.");
        assert_eq!(line["body"]["messages"][1]["role"], "user");
        assert!((line["body"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn render_errors_propagate() {
        let result = build_requests(&[Record::new("1", "x")], "m", 0.3, |_| {
            Err(hotpulse_core::HotpulseError::Template("boom".to_string()))
        });
        assert!(result.is_err());
    }
}
