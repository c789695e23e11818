use std::{env, fmt, str::FromStr, time::Duration};

use camino::Utf8PathBuf;
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result, Section,
};

use crate::translate::Strategy;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONCURRENT_TRANSCRIPTIONS: usize = 2;

pub struct Config {
    pub telegram_bot_token: String,
    pub deepl: DeepLConfig,
    pub translation_strategy: Strategy,
    /// `None` leaves voice, audio and video messages unanswered.
    pub whisper: Option<WhisperConfig>,
    pub scratch_dir: Utf8PathBuf,
    pub max_concurrent_transcriptions: usize,
    pub drop_pending_updates: bool,
    pub tokio_console: bool,
}

pub struct DeepLConfig {
    pub auth_key: String,
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub binary: String,
    pub model: Utf8PathBuf,
    pub language: String,
    pub ffmpeg: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &str| {
            var(key).ok_or_else(|| {
                eyre!("{key} is not set").suggestion(format!("export {key} or add it to .env"))
            })
        };

        let telegram_bot_token = required("TELEGRAM_BOT_TOKEN")?;
        let deepl = DeepLConfig {
            auth_key: required("DEEPL_API_KEY")?,
            endpoint: var("DEEPL_API_URL"),
            timeout: Duration::from_secs(parse_or(
                var("HTTP_TIMEOUT_SECS"),
                "HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
        };
        let translation_strategy = parse_strategy(
            var("TRANSLATION_STRATEGY"),
            "TRANSLATION_STRATEGY",
            Strategy::Both,
        )?;

        let whisper = match (var("WHISPER_PATH"), var("WHISPER_MODEL")) {
            (Some(path), Some(model)) => Some(WhisperConfig {
                binary: var("WHISPER_BIN").unwrap_or_else(|| "whisper-cpp".to_owned()),
                model: Utf8PathBuf::from(path).join("models").join(model),
                language: var("WHISPER_LANGUAGE").unwrap_or_else(|| "auto".to_owned()),
                ffmpeg: var("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".to_owned()),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(eyre!("WHISPER_PATH is set but WHISPER_MODEL is not")
                    .suggestion("set both to enable transcription, or neither to disable it"))
            }
            (None, Some(_)) => {
                return Err(eyre!("WHISPER_MODEL is set but WHISPER_PATH is not")
                    .suggestion("set both to enable transcription, or neither to disable it"))
            }
        };

        let scratch_dir = match var("SCRATCH_DIR") {
            Some(dir) => Utf8PathBuf::from(dir),
            None => Utf8PathBuf::from_path_buf(env::temp_dir())
                .map_err(|path| eyre!("temporary directory {path:?} is not valid UTF-8"))
                .suggestion("set SCRATCH_DIR to a UTF-8 path")?,
        };

        let max_concurrent_transcriptions = parse_or(
            var("MAX_CONCURRENT_TRANSCRIPTIONS"),
            "MAX_CONCURRENT_TRANSCRIPTIONS",
            DEFAULT_MAX_CONCURRENT_TRANSCRIPTIONS,
        )?;
        if max_concurrent_transcriptions == 0 {
            return Err(eyre!("MAX_CONCURRENT_TRANSCRIPTIONS must be at least 1"));
        }

        Ok(Self {
            telegram_bot_token,
            deepl,
            translation_strategy,
            whisper,
            scratch_dir,
            max_concurrent_transcriptions,
            drop_pending_updates: parse_flag(var("DROP_PENDING_UPDATES"), "DROP_PENDING_UPDATES", true)?,
            tokio_console: parse_flag(var("TOKIO_CONSOLE"), "TOKIO_CONSOLE", false)?,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("deepl_endpoint", &self.deepl.endpoint)
            .field("deepl_timeout", &self.deepl.timeout)
            .field("translation_strategy", &self.translation_strategy)
            .field("whisper", &self.whisper)
            .field("scratch_dir", &self.scratch_dir)
            .field("max_concurrent_transcriptions", &self.max_concurrent_transcriptions)
            .field("drop_pending_updates", &self.drop_pending_updates)
            .field("tokio_console", &self.tokio_console)
            .finish_non_exhaustive()
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(value) => value
            .parse()
            .wrap_err_with(|| format!("invalid value {value:?} for {key}")),
        None => Ok(default),
    }
}

fn parse_strategy(value: Option<String>, key: &str, default: Strategy) -> Result<Strategy> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "both" => Ok(Strategy::Both),
        "detect" => Ok(Strategy::Detect),
        _ => Err(eyre!("invalid value {value:?} for {key}").suggestion("use both or detect")),
    }
}

fn parse_flag(value: Option<String>, key: &str, default: bool) -> Result<bool> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(eyre!("invalid value {value:?} for {key}").suggestion("use true or false")),
    }
}

/// Loads `.env` into the process environment. Only a missing file is ignored.
pub fn load_dotenv() -> Result<()> {
    ignore_missing_dotenv(dotenvy::dotenv().map(drop))
}

fn ignore_missing_dotenv(result: Result<(), dotenvy::Error>) -> Result<()> {
    match result {
        Err(err) if err.not_found() => Ok(()),
        result => result
            .wrap_err("failed to read .env")
            .suggestion("fix the offending line or remove the file"),
    }
}
