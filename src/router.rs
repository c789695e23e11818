//! Turns one incoming chat event into at most one reply.
//!
//! The router knows nothing about Telegram: the translation service, the
//! speech model and the media download are collaborators handed in at
//! startup.

use std::sync::Arc;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, WrapErr};
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::{
    transcribe::{Transcriber, Transcription},
    translate::{translate_bilingual, Strategy, Translator},
};

const WELCOME: &str = "👋 Hello! I'm your Portuguese-English translator bot!\n\
    👋 Olá! Sou o teu bot tradutor de português-inglês!\n\n\
    I will automatically translate:\n\
    🇬🇧 English messages to Portuguese 🇵🇹\n\
    🇵🇹 Portuguese messages to English 🇬🇧\n\n";

const WELCOME_MEDIA: &str = "🎙 Voice messages, audio and videos are transcribed and translated too.\n\
    🎙 Mensagens de voz, áudios e vídeos também são transcritos e traduzidos.\n\n";

const WELCOME_END: &str = "Just start typing in either language!\n\
    Escreve numa das duas línguas!";

const HELP: &str = "/start - show the welcome message\n\
    /help - list the commands\n\n\
    Anything else you send is translated between English and Portuguese.";

pub const COULD_NOT_TRANSCRIBE: &str =
    "🤷 Sorry, I couldn't transcribe that. / Desculpe, não consegui transcrever isso.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Voice,
    Audio,
    Video,
    VideoNote,
}

impl MediaKind {
    fn default_suffix(self) -> &'static str {
        match self {
            Self::Voice => ".oga",
            Self::Audio => ".mp3",
            Self::Video | Self::VideoNote => ".mp4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub file_id: String,
    /// Original file name, when the platform reports one.
    pub file_name: Option<String>,
}

impl MediaAttachment {
    fn suffix(&self) -> String {
        self.file_name
            .as_deref()
            .and_then(|name| Utf8Path::new(name).extension())
            .filter(|extension| extension.chars().all(|c| c.is_ascii_alphanumeric()))
            .map_or_else(|| self.kind.default_suffix().to_owned(), |extension| format!(".{extension}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Help,
    Text(String),
    Media(MediaAttachment),
}

impl Event {
    fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Text(_) => "text",
            Self::Media(_) => "media",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub from_bot: bool,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Send as a reply to the original message.
    pub quote: bool,
}

impl Reply {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quote: false,
        }
    }

    fn quoting(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quote: true,
        }
    }
}

/// Fetches a chat attachment into a local file, returning its size.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn download(&self, file_id: &str, destination: &Utf8Path) -> color_eyre::Result<u64>;
}

struct MediaPipeline {
    transcriber: Arc<dyn Transcriber>,
    media: Arc<dyn MediaSource>,
    scratch_dir: Utf8PathBuf,
    permits: Arc<Semaphore>,
}

impl MediaPipeline {
    /// Runs the transcriber on a worker task that owns both the scratch file
    /// and the permit until it finishes. Errors and panics come back as an
    /// empty transcription.
    async fn transcribe(&self, scratch: NamedTempFile, media: Utf8PathBuf) -> Transcription {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return Transcription::default();
        };
        let transcriber = Arc::clone(&self.transcriber);
        let task = tokio::spawn(
            async move {
                let result = transcriber.transcribe(&media).await;
                if let Err(err) = scratch.close() {
                    warn!(?err, "failed to remove scratch file");
                }
                drop(permit);
                result
            }
            .in_current_span(),
        );
        match task.await {
            Ok(Ok(transcription)) => transcription,
            Ok(Err(err)) => {
                warn!(?err, "transcription failed");
                Transcription::default()
            }
            Err(err) => {
                error!(?err, "transcription task died");
                Transcription::default()
            }
        }
    }
}

pub struct Router {
    translator: Arc<dyn Translator>,
    strategy: Strategy,
    media: Option<MediaPipeline>,
}

impl Router {
    pub fn new(translator: Arc<dyn Translator>, strategy: Strategy) -> Self {
        Self {
            translator,
            strategy,
            media: None,
        }
    }

    /// Enables voice, audio, video and video note handling. Downloads land in
    /// `scratch_dir`; at most `max_concurrent` transcriptions run at once.
    pub fn with_transcription(
        mut self,
        transcriber: Arc<dyn Transcriber>,
        media: Arc<dyn MediaSource>,
        scratch_dir: Utf8PathBuf,
        max_concurrent: usize,
    ) -> Self {
        self.media = Some(MediaPipeline {
            transcriber,
            media,
            scratch_dir,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        });
        self
    }

    pub fn transcribes(&self) -> bool {
        self.media.is_some()
    }

    pub fn welcome(&self) -> String {
        if self.transcribes() {
            format!("{WELCOME}{WELCOME_MEDIA}{WELCOME_END}")
        } else {
            format!("{WELCOME}{WELCOME_END}")
        }
    }

    /// Never fails: anything that goes wrong is logged and means no reply.
    #[instrument(skip_all, fields(event = incoming.event.kind()))]
    pub async fn handle(&self, incoming: &Incoming) -> Option<Reply> {
        if incoming.from_bot {
            debug!("ignoring bot-authored event");
            return None;
        }
        match self.dispatch(&incoming.event).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(?err, "failed to handle event");
                None
            }
        }
    }

    async fn dispatch(&self, event: &Event) -> color_eyre::Result<Option<Reply>> {
        match event {
            Event::Start => Ok(Some(Reply::plain(self.welcome()))),
            Event::Help => Ok(Some(Reply::plain(HELP))),
            Event::Text(text) => {
                let translated =
                    translate_bilingual(&*self.translator, text, self.strategy, None).await;
                Ok(translated.map(|translated| Reply::quoting(translated.render())))
            }
            Event::Media(attachment) => self.transcribe_media(attachment).await,
        }
    }

    async fn transcribe_media(
        &self,
        attachment: &MediaAttachment,
    ) -> color_eyre::Result<Option<Reply>> {
        let Some(pipeline) = &self.media else {
            debug!("transcription disabled, ignoring media");
            return Ok(None);
        };

        // Removed on drop, here or inside the transcription task.
        let scratch = tempfile::Builder::new()
            .prefix("tradubot-")
            .suffix(&attachment.suffix())
            .tempfile_in(&pipeline.scratch_dir)
            .wrap_err_with(|| format!("failed to create a file in {}", pipeline.scratch_dir))?;
        let path = Utf8PathBuf::from_path_buf(scratch.path().to_owned())
            .map_err(|path| eyre!("scratch file {path:?} is not valid UTF-8"))?;

        let bytes = pipeline
            .media
            .download(&attachment.file_id, &path)
            .await
            .wrap_err("failed to download media")?;
        info!(bytes, kind = ?attachment.kind, "downloaded media");

        let transcription = pipeline.transcribe(scratch, path).await;

        if transcription.is_empty() {
            info!("nothing transcribed");
            return Ok(Some(Reply::quoting(COULD_NOT_TRANSCRIBE)));
        }

        let translated = translate_bilingual(
            &*self.translator,
            &transcription.text,
            self.strategy,
            Some(transcription.language.as_str()),
        )
        .await;
        Ok(Some(Reply::quoting(render_transcript(
            &transcription,
            translated.map(|translated| translated.render()),
        ))))
    }
}

fn render_transcript(transcription: &Transcription, translated: Option<String>) -> String {
    let mut text = if transcription.language.is_empty() {
        format!("🎙 {}", transcription.text)
    } else {
        format!(
            "🎙 [{}] {}",
            transcription.language.to_uppercase(),
            transcription.text
        )
    };
    if let Some(translated) = translated {
        text.push_str("\n\n");
        text.push_str(&translated);
    }
    text
}
