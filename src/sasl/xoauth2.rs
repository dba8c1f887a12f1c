/*
 * xoauth2.rs
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

//! XOAUTH2 for Gmail and Outlook.
//!
//! Single-shot: the initial response is
//!
//! ```text
//! user={user}\x01auth=Bearer {access_token}\x01\x01
//! ```
//!
//! On rejection the server sends a JSON challenge; the client answers
//! with an empty response to elicit the final `-ERR`.
//!
//! See <https://developers.google.com/gmail/imap/xoauth2-protocol>

use super::{SaslError, SaslMechanism};

pub struct XOAuth2 {
    user: String,
    access_token: String,
    sent: bool,
}

impl XOAuth2 {
    pub fn new(user: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            access_token: access_token.into(),
            sent: false,
        }
    }

    fn payload(&self) -> Vec<u8> {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
        .into_bytes()
    }
}

impl SaslMechanism for XOAuth2 {
    fn name(&self) -> &str {
        "XOAUTH2"
    }

    fn supports_initial_response(&self) -> bool {
        true
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        self.sent = true;
        Some(self.payload())
    }

    fn challenge(&mut self, _input: &[u8]) -> Result<Vec<u8>, SaslError> {
        if self.sent {
            // Error detail arrives base64-encoded; the empty reply asks
            // the server to finish the exchange.
            return Ok(Vec::new());
        }
        self.sent = true;
        Ok(self.payload())
    }

    fn is_complete(&self) -> bool {
        self.sent
    }
}
