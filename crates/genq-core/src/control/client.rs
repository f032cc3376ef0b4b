use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::{ControlCommand, ControlReply};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Send one command to the leader listening on `socket_path` and wait for its
/// reply. `Ok(None)` means nobody is listening.
pub async fn send_command(socket_path: &Path, cmd: &ControlCommand) -> Result<Option<ControlReply>> {
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(path = %socket_path.display(), "control socket connect: {}", e);
            return Ok(None);
        }
    };
    let (read, mut write) = stream.into_split();
    write
        .write_all(cmd.to_line().as_bytes())
        .await
        .context("write control command")?;

    let mut lines = BufReader::new(read).lines();
    let line = tokio::time::timeout(REPLY_TIMEOUT, lines.next_line())
        .await
        .context("no reply from the control socket")?
        .context("read control reply")?;
    let Some(line) = line else {
        bail!("control socket closed without a reply");
    };
    let reply = ControlReply::parse(&line)
        .with_context(|| format!("malformed control reply {line:?}"))?;
    Ok(Some(reply))
}
