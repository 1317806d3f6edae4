use std::path::Path;

use hotpulse_core::template::inject_background;
use hotpulse_core::{HotpulseError, HotpulseResult};
use tracing::info;

/// Replace the background section of the prompt file at `prompt_path` with
/// the text of `source_path` (usually the knowledge artifact). Returns the
/// number of characters injected.
pub fn inject_context_file(prompt_path: &Path, source_path: &Path) -> HotpulseResult<usize> {
    let prompt = std::fs::read_to_string(prompt_path).map_err(|e| {
        HotpulseError::Config(format!(
            "Failed to read labeling prompt {}: {e}",
            prompt_path.display()
        ))
    })?;
    let context = std::fs::read_to_string(source_path)?;

    let updated = inject_background(&prompt, &context)?;
    std::fs::write(prompt_path, updated)?;

    let chars = context.trim_end().chars().count();
    info!(
        prompt = %prompt_path.display(),
        source = %source_path.display(),
        chars,
        "Background context injected"
    );
    Ok(chars)
}
