//! Control commands for a running scheduler, sent over a Unix socket.
//!
//! Protocol: one command per line: `retry <id>`, `cancel <id>` or `wake`.
//! `wake` asks the leader to pick up jobs another process appended to the
//! store without waiting for its next heartbeat. Every command gets one
//! reply line: `ok` or `err <reason>`.
//!
//! Only the current leader listens on the socket. A leader that steps down
//! closes its listener and the next leader binds the same path.

mod client;
mod server;

use std::path::PathBuf;

pub use client::send_command;
pub use server::spawn_control_server;

use crate::job::JobId;
use crate::sync::UserAction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Action(UserAction),
    Wake,
}

impl ControlCommand {
    /// Parse one protocol line. Returns None for malformed lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next()?;
        let arg = parts.next();
        if parts.next().is_some() {
            return None;
        }
        match (verb, arg) {
            ("wake", None) => Some(ControlCommand::Wake),
            ("retry", Some(id)) => Some(ControlCommand::Action(UserAction::Retry(JobId::from(id)))),
            ("cancel", Some(id)) => Some(ControlCommand::Action(UserAction::Cancel(JobId::from(id)))),
            _ => None,
        }
    }

    /// Protocol line including the trailing newline.
    pub fn to_line(&self) -> String {
        match self {
            ControlCommand::Wake => "wake\n".to_string(),
            ControlCommand::Action(UserAction::Retry(id)) => format!("retry {id}\n"),
            ControlCommand::Action(UserAction::Cancel(id)) => format!("cancel {id}\n"),
        }
    }
}

/// Answer to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Ok,
    Rejected(String),
}

impl ControlReply {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line == "ok" {
            return Some(ControlReply::Ok);
        }
        let reason = line.strip_prefix("err")?;
        if !reason.is_empty() && !reason.starts_with(' ') {
            return None;
        }
        Some(ControlReply::Rejected(reason.trim().to_string()))
    }

    pub fn to_line(&self) -> String {
        match self {
            ControlReply::Ok => "ok\n".to_string(),
            ControlReply::Rejected(reason) => {
                // A reason never spans lines.
                let reason = reason.replace(['\r', '\n'], " ");
                format!("err {reason}\n")
            }
        }
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("genq")?.get_state_home();
    Ok(dir.join("control.sock"))
}
