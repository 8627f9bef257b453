//! Child process helper shared by the local and OpenSSH backends

use crate::command::CommandResult;
use crate::error::Result;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run `cmd` to completion, feeding `stdin` when given
///
/// Input is written while output is drained so a chatty child cannot
/// deadlock on a full pipe.
pub(crate) async fn run(mut cmd: Command, stdin: Option<&str>) -> Result<Output> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    let pipe = child.stdin.take();

    let writer = async move {
        if let (Some(data), Some(mut pipe)) = (stdin, pipe) {
            pipe.write_all(data.as_bytes()).await?;
            pipe.shutdown().await?;
        }
        Ok::<(), std::io::Error>(())
    };

    let (written, output) = tokio::join!(writer, child.wait_with_output());
    let output = output?;
    if let Err(err) = written {
        // The child may exit before reading all of its input.
        tracing::debug!("stdin not fully consumed: {}", err);
    }
    Ok(output)
}

pub(crate) fn to_result(command: &str, output: &Output) -> CommandResult {
    CommandResult::new(
        command,
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    )
}
