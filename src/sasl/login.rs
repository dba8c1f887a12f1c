/*
 * login.rs
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

//! Legacy LOGIN: two challenges, username then password. Only safe over TLS.

use super::{SaslError, SaslMechanism};

pub struct Login {
    username: String,
    password: String,
    responses: u8,
}

impl Login {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            responses: 0,
        }
    }
}

impl SaslMechanism for Login {
    fn name(&self) -> &str {
        "LOGIN"
    }

    fn challenge(&mut self, input: &[u8]) -> Result<Vec<u8>, SaslError> {
        if self.responses >= 2 {
            return Ok(Vec::new());
        }
        // Prompts are usually "Username:"/"Password:", but some servers
        // send empty challenges; fall back to ordering then.
        let prompt = String::from_utf8_lossy(input).to_lowercase();
        let value = if prompt.contains("password") {
            &self.password
        } else if prompt.contains("user") {
            &self.username
        } else if self.responses == 0 {
            &self.username
        } else {
            &self.password
        };
        self.responses += 1;
        Ok(value.clone().into_bytes())
    }

    fn is_complete(&self) -> bool {
        self.responses >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompted_order() {
        let mut mech = Login::new("alice", "secret");
        assert_eq!(mech.challenge(b"Username:").unwrap(), b"alice");
        assert!(!mech.is_complete());
        assert_eq!(mech.challenge(b"Password:").unwrap(), b"secret");
        assert!(mech.is_complete());
    }

    #[test]
    fn empty_challenges_use_step_order() {
        let mut mech = Login::new("username", "password");
        assert_eq!(mech.challenge(b"").unwrap(), b"username");
        assert_eq!(mech.challenge(b"").unwrap(), b"password");
        assert!(mech.is_complete());
    }

    #[test]
    fn extra_challenge_gets_empty_response() {
        let mut mech = Login::new("u", "p");
        mech.challenge(b"").unwrap();
        mech.challenge(b"").unwrap();
        assert_eq!(mech.challenge(b"anything").unwrap(), b"");
    }
}
