//! Invocation of the external stty tool.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::{Result, SttyError};

/// Path to the stty executable.
pub const STTY_PATH: &str = "/bin/stty";

/// Checks whether the stty executable is present on this system.
pub fn is_platform_compatible() -> bool {
    Path::new(STTY_PATH).exists()
}

/// Applies an ordered directive list to a device by calling stty once.
///
/// The device selector (`-F <device>`) is prepended to the caller-supplied
/// directives. Directives containing spaces ("min 10") are split into
/// individual arguments, matching how a shell would tokenize the joined
/// command line.
///
/// stty signals trouble by writing to stderr; a non-empty stderr fails the
/// call with [`SttyError::CommandFailed`] carrying that text. On success
/// the raw stdout is returned as an unparsed diagnostic.
pub async fn apply_directives(device: &str, directives: &[String]) -> Result<String> {
    let mut command = Command::new(STTY_PATH);
    command
        .arg("-F")
        .arg(device)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    for directive in directives {
        for token in directive.split_whitespace() {
            command.arg(token);
        }
    }

    log::debug!("stty -F {} {}", device, directives.join(" "));

    let mut child = command.spawn()?;

    // Read both streams to EOF before waiting for the process to exit.
    // Waiting first can deadlock if stty fills a pipe buffer.
    let mut stdout = child.stdout.take().expect("stdout was piped");
    let mut stderr = child.stderr.take().expect("stderr was piped");
    let mut output = String::new();
    let mut error = String::new();
    let (out_res, err_res) = tokio::join!(
        stdout.read_to_string(&mut output),
        stderr.read_to_string(&mut error)
    );
    out_res?;
    err_res?;

    let status = child.wait().await?;

    if !error.trim().is_empty() {
        return Err(SttyError::CommandFailed(error.trim().to_string()));
    }
    if !status.success() {
        log::debug!("stty exited with {} but produced no stderr", status);
    }

    Ok(output)
}
