use std::{
    path::Path,
    process::{ExitStatus, Stdio},
};

#[derive(thiserror::Error, Debug)]
pub enum FfmpegError {
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
    #[error("ffmpeg exited with {0}")]
    Failed(ExitStatus),
}

/// Remuxes `input` into `output` without re-encoding, resetting timestamps
/// so the recording starts at zero.
pub async fn reset_timestamps(
    program: &Path,
    input: &Path,
    output: &Path,
) -> Result<(), FfmpegError> {
    let mut child = tokio::process::Command::new(program);

    child
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(input)
        .arg("-c")
        .arg("copy")
        .arg("-map")
        .arg("0")
        .arg("-reset_timestamps")
        .arg("1")
        .arg("-y")
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let status = child.spawn().map_err(FfmpegError::IoError)?.wait().await?;
    if !status.success() {
        return Err(FfmpegError::Failed(status));
    }

    Ok(())
}
