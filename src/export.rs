//! Session transcript export.
//!
//! Writes a [`SessionTranscript`] as pretty JSON, either to a file or to
//! stdout for piping.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use docchat_core::session::SessionTranscript;

/// Write `transcript` to `output`, or to stdout when `output` is `None`.
pub fn write_transcript(transcript: &SessionTranscript, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(transcript)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(
                session = %transcript.session_id,
                turns = transcript.turns.len(),
                path = %path.display(),
                "exported transcript"
            );
        }
        None => {
            println!("{}", json);
        }
    }
    Ok(())
}
