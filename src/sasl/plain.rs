/*
 * plain.rs
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

//! PLAIN SASL (RFC 4616). Single shot; only safe over TLS.

use super::{SaslError, SaslMechanism};

/// Payload: NUL authzid NUL authcid NUL password (UTF-8).
pub struct Plain {
    authzid: String,
    authcid: String,
    password: String,
    sent: bool,
}

impl Plain {
    pub fn new(authcid: impl Into<String>, password: impl Into<String>) -> Self {
        Self::with_authzid("", authcid, password)
    }

    pub fn with_authzid(
        authzid: impl Into<String>,
        authcid: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            authzid: authzid.into(),
            authcid: authcid.into(),
            password: password.into(),
            sent: false,
        }
    }

    fn payload(&self) -> Vec<u8> {
        format!("\0{}\0{}\0{}", self.authzid, self.authcid, self.password).into_bytes()
    }
}

impl SaslMechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn supports_initial_response(&self) -> bool {
        true
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        self.sent = true;
        Some(self.payload())
    }

    fn challenge(&mut self, _input: &[u8]) -> Result<Vec<u8>, SaslError> {
        // Server declined the initial response path: send the payload now.
        if self.sent {
            return Ok(Vec::new());
        }
        self.sent = true;
        Ok(self.payload())
    }

    fn is_complete(&self) -> bool {
        self.sent
    }
}
