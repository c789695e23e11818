use color_eyre::{
    eyre::{eyre, WrapErr},
    Report, Section, SectionExt,
};
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStderr},
    task::JoinHandle,
};

/// Collected in the background so a chatty child never blocks on a full pipe.
pub type CapturedStderr = JoinHandle<std::io::Result<Vec<u8>>>;

pub fn capture_stderr(mut stderr: ChildStderr) -> CapturedStderr {
    tokio::spawn(async move {
        let mut buffer = vec![];
        stderr.read_to_end(&mut buffer).await?;
        Ok(buffer)
    })
}

pub fn take_pipe<T>(pipe: Option<T>, program: &str, name: &str) -> color_eyre::Result<T> {
    pipe.ok_or_else(|| eyre!("{program} was spawned without {name}"))
}

pub async fn ensure_exit_ok(
    program: &str,
    child: &mut Child,
    stderr: CapturedStderr,
) -> color_eyre::Result<(), Report> {
    let status = child
        .wait()
        .await
        .wrap_err_with(|| format!("failed to wait for {program}"))?;

    if status.success() {
        return Ok(());
    }
    let buffer = stderr.await??;
    let stderr = String::from_utf8_lossy(&buffer).trim_end().to_owned();
    let summary = match last_line(&stderr) {
        Some(line) => format!("{program} exited unsuccessfully ({status}): {line}"),
        None => format!("{program} exited unsuccessfully ({status})"),
    };

    Err(eyre!(summary)
        .section(format!("{:?}", status.code()).header("status code:"))
        .section(stderr.header("stderr:")))
}

fn last_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).rev().find(|line| !line.is_empty())
}
