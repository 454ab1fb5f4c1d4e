//! The `docchat ask` and `docchat chat` commands.
//!
//! `ask` answers a single question in a throwaway session. `chat` runs a
//! read-answer loop on stdin within one session until `exit`, `quit` or end
//! of input, optionally exporting the transcript afterwards.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use docchat_core::chain::Answer;

use crate::engine::Engine;
use crate::export::write_transcript;

pub async fn run_ask(engine: &Engine, question: &str, profile: Option<&str>) -> Result<()> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let answer = engine.ask(&session_id, question, profile).await?;
    println!("{}", render_answer(&answer));
    engine.sessions().end(&session_id);
    Ok(())
}

pub async fn run_chat(
    engine: &Engine,
    profile: Option<&str>,
    session: Option<String>,
    export: Option<&Path>,
) -> Result<()> {
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let interactive = atty::is(atty::Stream::Stdin);
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if interactive {
        let (name, _) = engine.profiles().resolve(profile);
        stdout
            .write_all(format!("docchat ({name}). Type 'exit' or 'quit' to leave.\n").as_bytes())
            .await?;
    }

    let mut profile = profile;
    loop {
        if interactive {
            stdout.write_all(b"\n> ").await?;
            stdout.flush().await?;
        }
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_exit(question) {
            break;
        }

        match engine.ask(&session_id, question, profile.take()).await {
            Ok(answer) => {
                stdout
                    .write_all(format!("{}\n", render_answer(&answer)).as_bytes())
                    .await?;
            }
            Err(e) => {
                warn!(session = %session_id, error = %e, "question failed");
                eprintln!("error: {e}");
            }
        }
        stdout.flush().await?;
    }

    if let (Some(path), Some(handle)) = (export, engine.sessions().get(&session_id)) {
        let transcript = handle.lock().await.transcript();
        write_transcript(&transcript, Some(path))?;
    }
    engine.sessions().end(&session_id);
    Ok(())
}

fn is_exit(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

/// The answer text followed by a numbered list of source file names.
pub fn render_answer(answer: &Answer) -> String {
    let mut out = answer.text.clone();
    out.push_str(&format_sources(&answer.sources));
    out
}

pub fn format_sources(sources: &[String]) -> String {
    if sources.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\nSources:");
    for (i, source) in sources.iter().enumerate() {
        let name = Path::new(source)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source.clone());
        out.push_str(&format!("\n{}. {}", i + 1, name));
    }
    out
}
