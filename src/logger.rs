/*
 * logger.rs
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

//! Protocol traffic logger with secret redaction.
//!
//! Every line in both directions is recorded with a `C: `/`S: ` prefix.
//! Redaction is declared by the command that produced a client line, not
//! guessed from the text: `USER`/`PASS`/`APOP`/`AUTH` mask their
//! arguments, and every client line of a multi-step auth exchange is
//! masked whole. The wire bytes are never altered.

use std::io::Write;

/// What the command declared about its client line(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redaction {
    /// Nothing secret.
    None,
    /// The verb is loggable, each following argument is masked.
    Arguments,
    /// The whole line payload is masked (SASL continuations).
    FullLine,
}

const MASK: &str = "********";

/// Append-only sink for protocol traffic.
pub struct ProtocolLogger {
    sink: Box<dyn Write + Send>,
    redact_secrets: bool,
}

impl ProtocolLogger {
    pub fn new(sink: Box<dyn Write + Send>, redact_secrets: bool) -> Self {
        Self {
            sink,
            redact_secrets,
        }
    }

    /// Record one client line (without its CRLF). Sink failures are ignored;
    /// logging must never break the session.
    pub fn client_line(&mut self, line: &[u8], redaction: Redaction) {
        let rendered = if self.redact_secrets {
            match redaction {
                Redaction::None => None,
                Redaction::Arguments => Some(mask_arguments(line)),
                Redaction::FullLine => Some(MASK.to_string()),
            }
        } else {
            None
        };
        match rendered {
            Some(s) => {
                let _ = write!(self.sink, "C: {}\n", s);
            }
            None => {
                let _ = self.sink.write_all(b"C: ");
                let _ = self.sink.write_all(line);
                let _ = self.sink.write_all(b"\n");
            }
        }
    }

    /// Record one server line (without its CRLF). Server lines are never redacted.
    pub fn server_line(&mut self, line: &[u8]) {
        let _ = self.sink.write_all(b"S: ");
        let _ = self.sink.write_all(line);
        let _ = self.sink.write_all(b"\n");
    }
}

/// Keep the verb, replace each whitespace-separated argument with the mask.
fn mask_arguments(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    let mut words = text.split_whitespace();
    let mut out = String::new();
    if let Some(verb) = words.next() {
        out.push_str(verb);
    }
    for _ in words {
        out.push(' ');
        out.push_str(MASK);
    }
    out
}
