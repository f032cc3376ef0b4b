//! Control socket listener. Follows the instance's leadership.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use super::{ControlCommand, ControlReply};
use crate::scheduler::SchedulerContext;

/// Serve `path` for as long as `ctx` leads.
///
/// The socket is bound when the instance becomes leader and closed when it
/// steps down, so the next leader (in this process or another one) can take
/// the path over. A path still answered by a live listener is left alone and
/// retried every heartbeat.
pub fn spawn_control_server(ctx: Arc<SchedulerContext>, path: impl Into<PathBuf>) -> JoinHandle<()> {
    let path = path.into();
    tokio::spawn(async move { serve(ctx, path).await })
}

async fn serve(ctx: Arc<SchedulerContext>, path: PathBuf) {
    let mut leadership = ctx.watch_leadership();
    loop {
        if leadership.wait_for(|leader| *leader).await.is_err() {
            return;
        }
        let Some(listener) = bind_if_free(&path).await else {
            tokio::time::sleep(ctx.settings().heartbeat()).await;
            continue;
        };
        tracing::info!(path = %path.display(), tab_id = %ctx.tab_id(), "control socket listening");

        loop {
            tokio::select! {
                changed = leadership.changed() => {
                    if changed.is_err() || !*leadership.borrow_and_update() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_connection(Arc::clone(&ctx), stream));
                    }
                    Err(e) => tracing::debug!("control socket accept: {}", e),
                },
            }
        }
        drop(listener);
        tracing::info!(path = %path.display(), tab_id = %ctx.tab_id(), "control socket closed");
    }
}

/// Bind `path` unless a live listener already answers there. A stale socket
/// file left by a dead process is replaced.
async fn bind_if_free(path: &Path) -> Option<UnixListener> {
    if UnixStream::connect(path).await.is_ok() {
        tracing::debug!(path = %path.display(), "control socket owned by another instance");
        return None;
    }
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(path = %parent.display(), "creating control socket dir: {}", e);
            return None;
        }
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), "removing stale control socket: {}", e);
            return None;
        }
    }
    match UnixListener::bind(path) {
        Ok(listener) => Some(listener),
        Err(e) => {
            tracing::warn!(path = %path.display(), "control socket bind: {}", e);
            None
        }
    }
}

async fn handle_connection(ctx: Arc<SchedulerContext>, stream: UnixStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match ControlCommand::parse(&line) {
            Some(cmd) => match ctx.apply_command(cmd).await {
                Ok(()) => ControlReply::Ok,
                Err(e) => {
                    tracing::warn!("control command rejected: {}", e);
                    ControlReply::Rejected(e.to_string())
                }
            },
            None => ControlReply::Rejected(format!("malformed command {:?}", line.trim())),
        };
        if write.write_all(reply.to_line().as_bytes()).await.is_err() {
            break;
        }
    }
}
