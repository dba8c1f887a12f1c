/*
 * scram.rs
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

//! SCRAM-SHA-256 SASL client (RFC 5802, 7677).

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

use super::{base64_encode, SaslError, SaslMechanism};

type HmacSha256 = Hmac<Sha256>;

/// gs2-header: no channel binding, no authzid.
const GS2_HEADER: &str = "n,,";

enum Stage {
    Start,
    /// client-first sent; waiting for server-first.
    SentFirst { client_first_bare: String },
    /// client-final sent; waiting for the server signature.
    SentFinal { server_signature: String },
    Complete,
}

pub struct ScramSha256 {
    authcid: String,
    password: String,
    stage: Stage,
}

impl ScramSha256 {
    pub fn new(authcid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            authcid: authcid.into(),
            password: password.into(),
            stage: Stage::Start,
        }
    }

    fn client_first(&mut self) -> Vec<u8> {
        let nonce = generate_nonce();
        let client_first_bare = format!("n={},r={}", sasl_name(&self.authcid), nonce);
        let message = format!("{}{}", GS2_HEADER, client_first_bare);
        self.stage = Stage::SentFirst { client_first_bare };
        message.into_bytes()
    }

    fn client_final(
        &self,
        client_first_bare: &str,
        server_first: &str,
    ) -> Result<(Vec<u8>, String), SaslError> {
        let (nonce, salt_b64, iter_str) = parse_server_first(server_first)?;
        let client_nonce = client_first_bare
            .rsplit_once("r=")
            .map(|(_, n)| n)
            .unwrap_or("");
        if !nonce.starts_with(client_nonce) {
            return Err(SaslError::invalid("server nonce must extend client nonce"));
        }
        let salt = super::base64_decode(&salt_b64)
            .map_err(|_| SaslError::invalid("invalid salt base64"))?;
        let iterations: u32 = iter_str
            .parse()
            .map_err(|_| SaslError::invalid("invalid iteration count"))?;

        let salted_password = hi(&self.password, &salt, iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let server_key = hmac(&salted_password, b"Server Key");

        let client_final_no_proof =
            format!("c={},r={}", base64_encode(GS2_HEADER.as_bytes()), nonce);
        let auth_message = format!(
            "{},{},{}",
            client_first_bare, server_first, client_final_no_proof
        );
        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let client_proof = xor(&client_key, &client_signature);
        let client_final_msg = format!(
            "{},p={}",
            client_final_no_proof,
            base64_encode(&client_proof)
        );
        let server_signature = base64_encode(&hmac(&server_key, auth_message.as_bytes()));
        Ok((client_final_msg.into_bytes(), server_signature))
    }
}

impl SaslMechanism for ScramSha256 {
    fn name(&self) -> &str {
        "SCRAM-SHA-256"
    }

    fn supports_initial_response(&self) -> bool {
        true
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        Some(self.client_first())
    }

    fn challenge(&mut self, input: &[u8]) -> Result<Vec<u8>, SaslError> {
        match &self.stage {
            Stage::Start => Ok(self.client_first()),
            Stage::SentFirst { client_first_bare } => {
                let client_first_bare = client_first_bare.clone();
                let server_first = std::str::from_utf8(input)
                    .map_err(|_| SaslError::invalid("server-first not UTF-8"))?;
                let (message, server_signature) =
                    self.client_final(&client_first_bare, server_first)?;
                self.stage = Stage::SentFinal { server_signature };
                Ok(message)
            }
            Stage::SentFinal { server_signature } => {
                let server_final = std::str::from_utf8(input)
                    .map_err(|_| SaslError::invalid("server-final not UTF-8"))?;
                let verifier = server_final
                    .split(',')
                    .find_map(|part| part.trim().strip_prefix("v="))
                    .ok_or_else(|| SaslError::invalid("missing v in server-final"))?;
                if verifier != server_signature {
                    return Err(SaslError::invalid("server signature mismatch"));
                }
                self.stage = Stage::Complete;
                Ok(Vec::new())
            }
            Stage::Complete => Ok(Vec::new()),
        }
    }

    fn is_complete(&self) -> bool {
        matches!(self.stage, Stage::Complete)
    }
}

fn generate_nonce() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{:016x}{:08x}", t as u64, (t >> 64) as u32)
}

fn sasl_name(s: &str) -> String {
    s.replace('=', "=3D").replace(',', "=2C")
}

fn parse_server_first(input: &str) -> Result<(String, String, String), SaslError> {
    let mut r = None;
    let mut s = None;
    let mut i = None;
    for part in input.split(',') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("r=") {
            r = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("s=") {
            s = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("i=") {
            i = Some(v.to_string());
        }
    }
    let r = r.ok_or_else(|| SaslError::invalid("missing r in server-first"))?;
    let s = s.ok_or_else(|| SaslError::invalid("missing s in server-first"))?;
    let i = i.ok_or_else(|| SaslError::invalid("missing i in server-first"))?;
    Ok((r, s, i))
}

fn hi(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out.to_vec()
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_first_shape() {
        let mut mech = ScramSha256::new("user", "pencil");
        let first = String::from_utf8(mech.initial_response().unwrap()).unwrap();
        assert!(first.starts_with("n,,n=user,r="));
        assert!(!mech.is_complete());
    }

    #[test]
    fn names_with_commas_escaped() {
        assert_eq!(sasl_name("a,b=c"), "a=2Cb=3Dc");
    }

    #[test]
    fn rejects_foreign_nonce() {
        let mut mech = ScramSha256::new("user", "pencil");
        mech.initial_response();
        // Server echoes a nonce that does not extend ours.
        let err = mech
            .challenge(b"r=completely-different,s=c2FsdA==,i=4096")
            .unwrap_err();
        assert!(err.message.contains("nonce"));
    }

    #[test]
    fn full_exchange_against_computed_server() {
        // Drive both sides: derive the server's signature with the same
        // primitives and check the mechanism accepts it.
        let mut mech = ScramSha256::new("user", "pencil");
        let first = String::from_utf8(mech.initial_response().unwrap()).unwrap();
        let client_nonce = first.rsplit_once("r=").unwrap().1.to_string();
        let server_nonce = format!("{}serverext", client_nonce);
        let salt = b"salty";
        let iterations = 4096u32;
        let server_first = format!(
            "r={},s={},i={}",
            server_nonce,
            base64_encode(salt),
            iterations
        );

        let final_msg =
            String::from_utf8(mech.challenge(server_first.as_bytes()).unwrap()).unwrap();
        assert!(final_msg.contains(&format!("r={}", server_nonce)));

        let client_first_bare = first.trim_start_matches("n,,").to_string();
        let final_no_proof = final_msg.rsplit_once(",p=").unwrap().0.to_string();
        let auth_message = format!("{},{},{}", client_first_bare, server_first, final_no_proof);
        let salted = hi("pencil", salt, iterations);
        let server_key = hmac(&salted, b"Server Key");
        let server_signature = base64_encode(&hmac(&server_key, auth_message.as_bytes()));

        let server_final = format!("v={}", server_signature);
        let out = mech.challenge(server_final.as_bytes()).unwrap();
        assert!(out.is_empty());
        assert!(mech.is_complete());
    }
}
