use std::{
    ffi::OsString,
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use futures::StreamExt;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};
use tokio_stream::wrappers::LinesStream;

use crate::config::Cookies;

pub const WATCH_URL: &str = "https://chzzk.naver.com/live";

#[derive(thiserror::Error, Debug)]
pub enum StreamlinkError {
    #[error("streamlink not found: {0}")]
    NotFound(String),
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
}

pub fn watch_url(channel_id: &str) -> String {
    format!("{}/{}", WATCH_URL, channel_id)
}

pub fn build_args(
    channel_id: &str,
    output: &Path,
    quality: &str,
    cookies: &Cookies,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--output".into(),
        output.as_os_str().to_owned(),
        "--progress".into(),
        "no".into(),
        "--ffmpeg-start-at-zero".into(),
        "--ffmpeg-copyts".into(),
    ];

    for (name, value) in cookies.pairs() {
        args.push("--http-cookie".into());
        args.push(format!("{}={}", name, value).into());
    }

    args.push(watch_url(channel_id).into());
    args.push(quality.into());

    args
}

pub fn spawn(program: &Path, args: &[OsString]) -> Result<Child, StreamlinkError> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StreamlinkError::NotFound(program.display().to_string())
            }
            _ => StreamlinkError::IoError(e),
        })
}

async fn log_lines<R>(reader: R, channel_name: &str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = LinesStream::new(BufReader::new(reader).lines());
    while let Some(Ok(line)) = lines.next().await {
        let line = line.trim();
        if !line.is_empty() {
            debug!("[{}] streamlink: {}", channel_name, line);
        }
    }
}

/// Logs the child's stdout and stderr at debug level until both close.
pub fn forward_output(child: &mut Child, channel_name: &str) -> JoinHandle<()> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let channel_name = channel_name.to_string();

    tokio::spawn(async move {
        let out = async {
            if let Some(stdout) = stdout {
                log_lines(stdout, &channel_name).await;
            }
        };
        let err = async {
            if let Some(stderr) = stderr {
                log_lines(stderr, &channel_name).await;
            }
        };
        futures::join!(out, err);
    })
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::{
        sys::signal::{self, Signal},
        unistd::Pid,
    };

    match child.id() {
        Some(id) => signal::kill(Pid::from_raw(id as i32), Signal::SIGTERM)
            .map_err(|e| std::io::Error::from_raw_os_error(e as i32)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

/// Asks the child to exit and kills it if it is still running after
/// `grace`.
pub async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    send_terminate(child)?;
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("streamlink did not exit after {:?}, killing it", grace);
            child.kill().await?;
            child.wait().await
        }
    }
}
