use color_eyre::eyre::WrapErr;
use tokio::{
    io,
    io::{AsyncRead, AsyncWrite},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Telegram refuses messages longer than this many characters.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

pub fn pre_flight(tokio_console: bool) -> color_eyre::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(tokio_console.then(console_subscriber::spawn))
        .with(tracing_error::ErrorLayer::default())
        .init();
    color_eyre::install()?;

    Ok(())
}

pub async fn copy_moved<I, O>(mut input: I, mut output: O) -> color_eyre::Result<u64>
where
    I: AsyncRead + Unpin + Send,
    O: AsyncWrite + Unpin + Send,
{
    let bytes = io::copy(&mut input, &mut output)
        .await
        .wrap_err("failed to copy stream")?;
    Ok(bytes)
}

/// Splits `text` into pieces of at most `limit` characters, breaking after the
/// last newline inside a piece when there is one.
pub fn split_message(text: &str, limit: usize) -> Vec<&str> {
    let mut chunks = vec![];
    let mut rest = text;
    while rest.chars().count() > limit {
        let hard_end = rest
            .char_indices()
            .nth(limit)
            .map_or(rest.len(), |(pos, _)| pos);
        let end = match rest[..hard_end].rfind('\n') {
            Some(newline) if newline > 0 => newline + 1,
            _ => hard_end,
        };
        chunks.push(&rest[..end]);
        rest = &rest[end..];
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::split_message;

    #[test]
    fn short_messages_are_left_alone() {
        assert_eq!(split_message("olá", 4096), vec!["olá"]);
        assert_eq!(split_message("", 4096), vec![""]);
    }

    #[test]
    fn long_messages_break_on_newlines() {
        let text = "aaaa\nbbbb\ncc";
        assert_eq!(split_message(text, 6), vec!["aaaa\n", "bbbb\n", "cc"]);
    }

    #[test]
    fn long_lines_break_on_char_boundaries() {
        let text = "ããããã";
        assert_eq!(split_message(text, 2), vec!["ãã", "ãã", "ã"]);
    }
}
