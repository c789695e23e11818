use std::process::Stdio;

use camino::Utf8PathBuf;
use color_eyre::eyre::WrapErr;
use tokio::{io::AsyncWrite, process::Command};
use tracing::{info, instrument};

use super::process::{capture_stderr, ensure_exit_ok, take_pipe};
use crate::utils::copy_moved;

/// Decodes the audio track of `input` (any container ffmpeg understands,
/// video included) into 16 kHz mono WAV written to `output`.
#[instrument(skip(output), err)]
pub async fn decode_audio<O>(ffmpeg: String, input: Utf8PathBuf, output: O) -> color_eyre::Result<()>
where
    O: AsyncWrite + Unpin + Send,
{
    let mut child = Command::new(&ffmpeg)
        .args(["-nostdin", "-loglevel", "error", "-i", input.as_str()])
        .args([
            "-vn", // drop video
            "-f",
            "wav",
            "-c:a",
            "pcm_s16le",
            "-ac", // channels
            "1",
            "-ar", // frequency
            "16000",
            "-",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .wrap_err_with(|| format!("failed to run {ffmpeg}"))?;

    let stdout = take_pipe(child.stdout.take(), "ffmpeg", "stdout")?;
    let stderr = capture_stderr(take_pipe(child.stderr.take(), "ffmpeg", "stderr")?);

    info!("starting ffmpeg");
    let written_bytes = copy_moved(stdout, output)
        .await
        .wrap_err("failed to read ffmpeg output")?;

    info!(?written_bytes, "ffmpeg closed stdout");
    ensure_exit_ok("ffmpeg", &mut child, stderr)
        .await
        .wrap_err("ffmpeg failed")?;
    Ok(())
}
