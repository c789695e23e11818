mod ffmpeg;
mod process;
mod whisper;

use async_trait::async_trait;
use camino::Utf8Path;
use color_eyre::{eyre::eyre, Section};
use tokio::io;
use tracing::{info_span, instrument, Instrument};

use crate::{config::WhisperConfig, BUFFER_SIZE};

/// Transcript text and the language tag the model detected. Both are empty
/// when nothing could be transcribed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcription {
    pub text: String,
    pub language: String,
}

impl Transcription {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, media: &Utf8Path) -> color_eyre::Result<Transcription>;
}

/// Local whisper.cpp model fed by ffmpeg.
pub struct WhisperCpp {
    config: WhisperConfig,
}

impl WhisperCpp {
    pub fn new(config: WhisperConfig) -> color_eyre::Result<Self> {
        if !config.model.exists() {
            return Err(eyre!("whisper model {} does not exist", config.model)
                .suggestion("check WHISPER_PATH and WHISPER_MODEL"));
        }
        Ok(Self { config })
    }
}

#[async_trait]
impl Transcriber for WhisperCpp {
    #[instrument(skip(self), err)]
    async fn transcribe(&self, media: &Utf8Path) -> color_eyre::Result<Transcription> {
        let (read_wav, write_wav) = io::duplex(BUFFER_SIZE);

        let decode_handle = tokio::spawn(
            ffmpeg::decode_audio(self.config.ffmpeg.clone(), media.to_owned(), write_wav)
                .instrument(info_span!("decode_audio")),
        );
        let transcribed = whisper::subprocess_transcribe(&self.config, read_wav).await?;
        decode_handle.await??;

        Ok(transcribed)
    }
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;

    use camino::Utf8PathBuf;
    use color_eyre::{eyre::WrapErr, Result};
    use tokio::process::Command;
    use tracing::info;

    use super::*;
    use crate::config::Config;

    #[test]
    fn missing_model_is_rejected() {
        let config = WhisperConfig {
            binary: "whisper-cpp".to_owned(),
            model: Utf8PathBuf::from("/nonexistent/models/ggml-base.bin"),
            language: "auto".to_owned(),
            ffmpeg: "ffmpeg".to_owned(),
        };
        assert!(WhisperCpp::new(config).is_err());
    }

    #[tokio::test]
    #[ignore = "needs ffmpeg, whisper-cpp and WHISPER_PATH/WHISPER_MODEL"]
    async fn transcribes_generated_audio() -> Result<()> {
        let config = Config::from_lookup(|key| match key {
            "TELEGRAM_BOT_TOKEN" | "DEEPL_API_KEY" => Some("unused".to_owned()),
            _ => std::env::var(key).ok(),
        })?;
        let whisper = config
            .whisper
            .ok_or_else(|| eyre!("WHISPER_PATH and WHISPER_MODEL must be set"))?;
        let dir = tempfile::tempdir()?;
        let path = Utf8PathBuf::from_path_buf(dir.path().join("tone.ogg"))
            .map_err(|path| eyre!("{path:?} is not UTF-8"))?;

        let status = Command::new(&whisper.ffmpeg)
            .args(["-loglevel", "error", "-f", "lavfi", "-i", "sine=frequency=440:duration=2"])
            .args(["-c:a", "libopus", path.as_str()])
            .stdin(Stdio::null())
            .status()
            .await
            .wrap_err("failed to generate audio")?;
        assert!(status.success());

        let transcription = WhisperCpp::new(whisper)?.transcribe(&path).await?;
        info!(?transcription, "transcribed a tone");
        assert!(!transcription.language.is_empty());
        Ok(())
    }
}
