/*
 * error.rs
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

//! Client and protocol errors.

use std::fmt;
use std::io;

/// Machine-readable response code in brackets after `+OK`/`-ERR` (RFC 2449, 3206).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// `[IN-USE]` — maildrop locked by another session.
    InUse,
    /// `[LOGIN-DELAY]` — minimum delay between logins not yet elapsed.
    LoginDelay,
    /// `[SYS/TEMP]` — temporary server-side failure.
    SysTemp,
    /// `[SYS/PERM]` — permanent server-side failure.
    SysPerm,
    /// `[AUTH]` — credentials rejected.
    Auth,
    /// `[UTF8]` — response to UTF8-related commands.
    Utf8,
    /// Any other bracketed token, kept verbatim.
    Other(String),
}

impl ResponseCode {
    /// Parse the token between brackets (without the brackets).
    pub fn parse(token: &str) -> Self {
        match token.to_uppercase().as_str() {
            "IN-USE" => ResponseCode::InUse,
            "LOGIN-DELAY" => ResponseCode::LoginDelay,
            "SYS/TEMP" => ResponseCode::SysTemp,
            "SYS/PERM" => ResponseCode::SysPerm,
            "AUTH" => ResponseCode::Auth,
            "UTF8" => ResponseCode::Utf8,
            _ => ResponseCode::Other(token.to_string()),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::InUse => write!(f, "IN-USE"),
            ResponseCode::LoginDelay => write!(f, "LOGIN-DELAY"),
            ResponseCode::SysTemp => write!(f, "SYS/TEMP"),
            ResponseCode::SysPerm => write!(f, "SYS/PERM"),
            ResponseCode::Auth => write!(f, "AUTH"),
            ResponseCode::Utf8 => write!(f, "UTF8"),
            ResponseCode::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Errors from POP3 operations.
///
/// `Io` and `Protocol` close the session before they propagate (`Protocol`
/// stays open only for token-level parse failures in a well-framed
/// response); everything else leaves the session usable.
#[derive(Debug)]
pub enum Pop3Error {
    /// Transport read/write failure or timeout.
    Io(io::Error),
    /// The server sent something unparsable or out of sequence.
    Protocol(String),
    /// The server answered `-ERR` to a command.
    Command {
        message: String,
        code: Option<ResponseCode>,
    },
    /// Credential rejection or SASL failure; session remains connected.
    Auth {
        message: String,
        code: Option<ResponseCode>,
    },
    /// Feature absent from the negotiated capabilities.
    NotSupported(String),
    /// Operation requires an established session.
    NotConnected,
    /// Operation requires the transaction (authenticated) state.
    NotAuthenticated,
    /// Connect called on an already-connected client.
    AlreadyConnected,
    /// Authenticate called on an already-authenticated session.
    AlreadyAuthenticated,
    /// Operation aborted via the cancellation token.
    Cancelled,
}

impl Pop3Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Pop3Error::Protocol(msg.into())
    }

    pub(crate) fn timeout() -> Self {
        Pop3Error::Io(io::Error::new(io::ErrorKind::TimedOut, "I/O timed out"))
    }

    /// The server's response code, if one was present and negotiated.
    pub fn response_code(&self) -> Option<&ResponseCode> {
        match self {
            Pop3Error::Command { code, .. } | Pop3Error::Auth { code, .. } => code.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for Pop3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pop3Error::Io(e) => write!(f, "I/O error: {}", e),
            Pop3Error::Protocol(m) => write!(f, "protocol error: {}", m),
            Pop3Error::Command { message, code } => match code {
                Some(c) => write!(f, "server error [{}]: {}", c, message),
                None => write!(f, "server error: {}", message),
            },
            Pop3Error::Auth { message, code } => match code {
                Some(c) => write!(f, "authentication failed [{}]: {}", c, message),
                None => write!(f, "authentication failed: {}", message),
            },
            Pop3Error::NotSupported(m) => write!(f, "not supported: {}", m),
            Pop3Error::NotConnected => write!(f, "not connected"),
            Pop3Error::NotAuthenticated => write!(f, "not authenticated"),
            Pop3Error::AlreadyConnected => write!(f, "already connected"),
            Pop3Error::AlreadyAuthenticated => write!(f, "already authenticated"),
            Pop3Error::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Pop3Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Pop3Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Pop3Error {
    fn from(e: io::Error) -> Self {
        Pop3Error::Io(e)
    }
}
