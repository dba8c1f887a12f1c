/*
 * command.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Cassetta, a POP3 mail retrieval client.
 *
 * Cassetta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Cassetta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Cassetta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Enqueued commands, their typed replies, and the cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::capabilities::Capabilities;
use crate::logger::Redaction;

/// Lifecycle of an enqueued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Queued,
    Active,
    Ok,
    Err,
    ProtocolError,
}

/// How the response to a command is consumed and parsed. Each kind is a
/// small state machine reading exactly one response's worth of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandKind {
    /// Single status line, no payload.
    Simple,
    /// `STAT`: `+OK <count> <octets>`.
    Stat,
    /// `LIST`: multi-line `n size` entries.
    ListAll,
    /// `LIST n`: single-line `+OK n size`.
    ListOne,
    /// `UIDL`: multi-line `n uid` entries.
    UidlAll,
    /// `UIDL n`: single-line `+OK n uid`.
    UidlOne,
    /// `CAPA`: multi-line capability list.
    Capa,
    /// `RETR`/`TOP`: multi-line message payload.
    Retrieve,
    /// `LANG`: multi-line `tag description` entries.
    LangList,
}

/// Typed result of one command.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// `+OK` with no interesting payload.
    Ok,
    Stat {
        count: u32,
        size: u64,
    },
    /// `(message number, octets)` entries.
    Sizes(Vec<(u32, u64)>),
    Size {
        msg_no: u32,
        size: u64,
    },
    /// `(message number, unique id)` entries.
    Uids(Vec<(u32, String)>),
    Uid {
        msg_no: u32,
        uid: String,
    },
    Capabilities(Capabilities),
    Message(Vec<u8>),
    /// `(language tag, description)` entries.
    Languages(Vec<(String, String)>),
}

/// One request: raw bytes (a single CRLF-terminated line here; pipelined
/// groups are concatenated by the engine at flush), the response state
/// machine, and the logger declaration for its line.
pub(crate) struct Command {
    pub bytes: Vec<u8>,
    pub kind: CommandKind,
    pub redaction: Redaction,
    pub status: CommandStatus,
}

impl Command {
    pub fn line(text: &str, kind: CommandKind) -> Self {
        Self::redacted(text, kind, Redaction::None)
    }

    pub fn redacted(text: &str, kind: CommandKind, redaction: Redaction) -> Self {
        let mut bytes = Vec::with_capacity(text.len() + 2);
        bytes.extend_from_slice(text.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        Self {
            bytes,
            kind,
            redaction,
            status: CommandStatus::Queued,
        }
    }

    /// The command line without its CRLF, for the logger.
    pub fn logged_line(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 2]
    }
}

/// Cooperative cancellation signal, observed at every read/write.
///
/// Cloned tokens share one flag. Cancelling between commands aborts the
/// operation cleanly; cancelling mid-command breaks the session.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once cancelled; used in `select!` against pending I/O.
    pub(crate) async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_appends_crlf() {
        let cmd = Command::line("STAT", CommandKind::Stat);
        assert_eq!(cmd.bytes, b"STAT\r\n");
        assert_eq!(cmd.logged_line(), b"STAT");
        assert_eq!(cmd.status, CommandStatus::Queued);
    }

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        task.await.unwrap();
        assert!(token.is_cancelled());
    }
}
