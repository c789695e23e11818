use std::sync::Arc;

use color_eyre::{eyre::WrapErr, Result};
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::{
    config::Config,
    router::Router,
    telegram::TelegramMedia,
    transcribe::WhisperCpp,
    translate::deepl::DeepL,
};

mod config;
mod router;
mod telegram;
mod transcribe;
mod translate;
mod utils;

const BUFFER_SIZE: usize = 65_536;

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = config::load_dotenv();
    let config = Config::from_env();
    utils::pre_flight(config.as_ref().is_ok_and(|config| config.tokio_console))?;
    dotenv?;
    let config = config?;
    info!(?config, "Loaded configuration");

    let translator = DeepL::new(&config.deepl)?;
    translator.self_test().await?;
    info!(endpoint = translator.endpoint(), "DeepL translator initialized");
    match translator.usage().await {
        Ok(usage) => info!(usage.character_count, usage.character_limit, "DeepL usage"),
        Err(err) => warn!(?err, "Could not fetch DeepL usage"),
    }

    let bot = Bot::new(&config.telegram_bot_token);
    let me = bot.get_me().await.wrap_err("failed to reach Telegram")?;
    info!(username = me.username(), "Starting with");

    let mut router = Router::new(Arc::new(translator), config.translation_strategy);
    if let Some(whisper) = config.whisper {
        info!(model = %whisper.model, "Transcription enabled");
        router = router.with_transcription(
            Arc::new(WhisperCpp::new(whisper)?),
            Arc::new(TelegramMedia::new(bot.clone())),
            config.scratch_dir,
            config.max_concurrent_transcriptions,
        );
    } else {
        info!("Transcription disabled, set WHISPER_PATH and WHISPER_MODEL to enable it");
    }

    telegram::run(bot, me, Arc::new(router), config.drop_pending_updates).await;
    Ok(())
}
