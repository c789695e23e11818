use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8Path;
use color_eyre::eyre::WrapErr;
use teloxide::{
    net::Download,
    prelude::*,
    types::{ChatAction, FileId, Me, ReplyParameters},
    update_listeners::Polling,
    utils::command::BotCommands,
    Bot,
};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    router::{Event, Incoming, MediaAttachment, MediaKind, MediaSource, Reply, Router},
    utils::{split_message, TELEGRAM_MESSAGE_LIMIT},
};

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "show the welcome message")]
    Start,
    #[command(description = "list the commands")]
    Help,
}

/// Downloads attachments through the Bot API.
pub struct TelegramMedia {
    bot: Bot,
}

impl TelegramMedia {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MediaSource for TelegramMedia {
    #[instrument(skip(self), err)]
    async fn download(&self, file_id: &str, destination: &Utf8Path) -> color_eyre::Result<u64> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_owned()))
            .await
            .wrap_err("failed to look up file")?;
        info!(?file.path, "downloading file");

        let mut writer = File::create(destination)
            .await
            .wrap_err_with(|| format!("failed to open {destination}"))?;
        self.bot
            .download_file(&file.path, &mut writer)
            .await
            .wrap_err("failed to download file")?;
        writer.flush().await?;
        Ok(writer.metadata().await?.len())
    }
}

pub fn incoming_from_message(msg: &Message, bot_username: &str) -> Option<Incoming> {
    let from_bot = msg.from.as_ref().is_some_and(|user| user.is_bot);
    let event = match msg.text() {
        Some(text) => event_from_text(text, bot_username)?,
        None => Event::Media(attachment_from_message(msg)?),
    };
    Some(Incoming { from_bot, event })
}

/// Commands for another bot, and commands we don't know, are dropped.
fn event_from_text(text: &str, bot_username: &str) -> Option<Event> {
    if !text.starts_with('/') {
        return Some(Event::Text(text.to_owned()));
    }
    match Command::parse(text, bot_username) {
        Ok(Command::Start) => Some(Event::Start),
        Ok(Command::Help) => Some(Event::Help),
        Err(err) => {
            debug!(?err, "ignoring command");
            None
        }
    }
}

fn attachment_from_message(msg: &Message) -> Option<MediaAttachment> {
    let (kind, file_id, file_name) = if let Some(voice) = msg.voice() {
        (MediaKind::Voice, &voice.file.id, None)
    } else if let Some(audio) = msg.audio() {
        (MediaKind::Audio, &audio.file.id, audio.file_name.clone())
    } else if let Some(video) = msg.video() {
        (MediaKind::Video, &video.file.id, video.file_name.clone())
    } else if let Some(note) = msg.video_note() {
        (MediaKind::VideoNote, &note.file.id, None)
    } else {
        return None;
    };
    Some(MediaAttachment {
        kind,
        file_id: file_id.0.clone(),
        file_name,
    })
}

#[instrument(skip_all, fields(chat_id = %msg.chat.id))]
async fn deal_with_message(
    bot: Bot,
    msg: Message,
    me: Me,
    router: Arc<Router>,
) -> ResponseResult<()> {
    let Some(incoming) = incoming_from_message(&msg, me.username()) else {
        return Ok(());
    };
    info!("Processing message");

    if router.transcribes() && !incoming.from_bot && matches!(incoming.event, Event::Media(_)) {
        if let Err(err) = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await {
            warn!(?err, "failed to send chat action");
        }
    }

    if let Some(reply) = router.handle(&incoming).await {
        if let Err(err) = send_reply(&bot, &msg, &reply).await {
            error!(?err, "failed to send reply");
        }
    }
    Ok(())
}

async fn send_reply(bot: &Bot, msg: &Message, reply: &Reply) -> ResponseResult<()> {
    for chunk in split_message(&reply.text, TELEGRAM_MESSAGE_LIMIT) {
        let mut request = bot.send_message(msg.chat.id, chunk);
        if reply.quote {
            request = request.reply_parameters(ReplyParameters::new(msg.id));
        }
        request.await?;
    }
    Ok(())
}

/// Long-polls until ctrl-c.
pub async fn run(bot: Bot, me: Me, router: Arc<Router>, drop_pending_updates: bool) {
    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(?err, "failed to register the command menu");
    }

    let mut polling = Polling::builder(bot.clone());
    if drop_pending_updates {
        polling = polling.drop_pending_updates();
    }
    let listener = polling.build();

    let handler = Update::filter_message().endpoint(deal_with_message);
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![me, router])
        .default_handler(|upd| async move {
            debug!(id = ?upd.id, "unhandled update");
        })
        .error_handler(LoggingErrorHandler::with_custom_text("error in message handler"))
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("error from the update listener"),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_translated() {
        assert_eq!(
            event_from_text("Bom dia", "tradubot"),
            Some(Event::Text("Bom dia".to_owned()))
        );
    }

    #[test]
    fn known_commands() {
        assert_eq!(event_from_text("/start", "tradubot"), Some(Event::Start));
        assert_eq!(event_from_text("/start@tradubot", "tradubot"), Some(Event::Start));
        assert_eq!(event_from_text("/help", "tradubot"), Some(Event::Help));
    }

    #[test]
    fn other_commands_are_ignored() {
        assert_eq!(event_from_text("/settings", "tradubot"), None);
        assert_eq!(event_from_text("/start@someotherbot", "tradubot"), None);
    }
}
