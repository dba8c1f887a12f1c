/*
 * cram_md5.rs
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

//! CRAM-MD5 (RFC 2195): one challenge, answered with `user hex(hmac-md5)`.

use hmac::{Hmac, Mac};

use super::{SaslError, SaslMechanism};

type HmacMd5 = Hmac<md5::Md5>;

pub struct CramMd5 {
    username: String,
    password: String,
    done: bool,
}

impl CramMd5 {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            done: false,
        }
    }
}

impl SaslMechanism for CramMd5 {
    fn name(&self) -> &str {
        "CRAM-MD5"
    }

    fn challenge(&mut self, input: &[u8]) -> Result<Vec<u8>, SaslError> {
        if self.done {
            return Ok(Vec::new());
        }
        let mut mac = HmacMd5::new_from_slice(self.password.as_bytes())
            .map_err(|_| SaslError::invalid("HMAC key length"))?;
        mac.update(input);
        let digest = mac.finalize().into_bytes();
        let mut response = String::with_capacity(self.username.len() + 1 + digest.len() * 2);
        response.push_str(&self.username);
        response.push(' ');
        for byte in digest {
            response.push_str(&format!("{:02x}", byte));
        }
        self.done = true;
        Ok(response.into_bytes())
    }

    fn is_complete(&self) -> bool {
        self.done
    }
}
