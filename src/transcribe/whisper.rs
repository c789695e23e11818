use std::process::Stdio;

use camino::Utf8Path;
use color_eyre::eyre::{eyre, WrapErr};
use serde::Deserialize;
use tokio::{io::AsyncRead, process::Command};
use tracing::{info, instrument};

use super::{
    process::{capture_stderr, ensure_exit_ok, take_pipe},
    Transcription,
};
use crate::{config::WhisperConfig, translate::clean_text, utils::copy_moved};

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    result: WhisperResult,
    #[serde(default)]
    transcription: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct WhisperResult {
    language: String,
}

#[derive(Debug, Deserialize)]
struct Segment {
    text: String,
}

/// Non-speech annotations such as `[BLANK_AUDIO]` or `(music)`.
fn is_marker(segment: &str) -> bool {
    let segment = segment.trim();
    (segment.starts_with('[') && segment.ends_with(']'))
        || (segment.starts_with('(') && segment.ends_with(')'))
}

fn parse_output(json: &[u8]) -> color_eyre::Result<Transcription> {
    let output: WhisperOutput =
        serde_json::from_slice(json).wrap_err("failed to parse whisper-cpp output")?;
    let text = output
        .transcription
        .iter()
        .map(|segment| segment.text.as_str())
        .filter(|segment| !is_marker(segment))
        .collect::<Vec<_>>()
        .join(" ");
    Ok(Transcription {
        text: clean_text(&text),
        language: output.result.language,
    })
}

#[instrument(skip(whisper, wav_file), fields(model = %whisper.model), err)]
pub async fn subprocess_transcribe<I>(
    whisper: &WhisperConfig,
    wav_file: I,
) -> color_eyre::Result<Transcription>
where
    I: AsyncRead + Unpin + Send + 'static,
{
    let output_dir = tempfile::Builder::new()
        .prefix("whisper-")
        .tempdir()
        .wrap_err("failed to create whisper output directory")?;
    let output_base = Utf8Path::from_path(output_dir.path())
        .ok_or_else(|| eyre!("whisper output directory is not valid UTF-8"))?
        .join("transcript");

    let mut child = Command::new(&whisper.binary)
        .args(["-m", whisper.model.as_str(), "-l", whisper.language.as_str()])
        .args(["-np", "-oj", "-of", output_base.as_str(), "-"])
        .stderr(Stdio::piped())
        .stdout(Stdio::null())
        .stdin(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .wrap_err_with(|| format!("failed to spawn {}", whisper.binary))?;
    let stderr = capture_stderr(take_pipe(child.stderr.take(), "whisper-cpp", "stderr")?);
    let stdin = take_pipe(child.stdin.take(), "whisper-cpp", "stdin")?;

    let input_handle = tokio::spawn(copy_moved(wav_file, stdin));

    info!("starting whisper-cpp");
    let (input, exit) = tokio::join!(input_handle, ensure_exit_ok("whisper-cpp", &mut child, stderr));
    exit.wrap_err("whisper-cpp did not work")?;
    let piped = input?.wrap_err("failed to pipe wav file to whisper-cpp")?;
    info!(?piped, "whisper-cpp finished");

    let json_path = output_base.with_extension("json");
    let json = tokio::fs::read(&json_path)
        .await
        .wrap_err_with(|| format!("whisper-cpp wrote no {json_path}"))?;
    parse_output(&json)
}
