/*
 * capabilities.rs
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

//! Parsed `CAPA` result (RFC 2449).
//!
//! A capability set is rebuilt from scratch on every `CAPA` — after STLS
//! and after authentication the old set (including the SASL mechanism
//! list) is discarded, never merged.

use std::collections::HashSet;

/// Recognized capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `USER`/`PASS` login permitted.
    User,
    /// APOP digest login possible (greeting carried a timestamp).
    Apop,
    /// `SASL` advertised (see `auth_mechanisms`).
    Sasl,
    /// `STLS` upgrade available.
    Stls,
    /// `TOP` supported.
    Top,
    /// `UIDL` supported (advertised, or confirmed by probe).
    Uidl,
    /// `PIPELINING` — independent commands may share one write.
    Pipelining,
    /// `RESP-CODES` — bracketed response codes are meaningful.
    ResponseCodes,
    /// `EXPIRE` advertised (see `expire_days`).
    Expire,
    /// `LOGIN-DELAY` advertised (see `login_delay`).
    LoginDelay,
    /// `LANG` supported.
    Lang,
    /// `UTF8` supported.
    Utf8,
    /// `UTF8 USER` — UTF-8 user names accepted pre-auth.
    Utf8User,
}

/// Everything learned from one `CAPA` response.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    set: HashSet<Capability>,
    /// SASL mechanism names in advertisement order.
    pub auth_mechanisms: Vec<String>,
    /// Message retention: -1 never expires, 0 unset, otherwise days.
    pub expire_days: i32,
    /// Minimum seconds between logins.
    pub login_delay: u32,
    /// Server implementation string, if advertised.
    pub implementation: Option<String>,
    /// Unrecognized capability lines, verbatim.
    pub extensions: Vec<String>,
}

impl Capabilities {
    /// The assumption when `CAPA` itself fails: `USER` login only.
    /// `UIDL` is probed lazily at first use in that case.
    pub fn fallback() -> Self {
        let mut caps = Capabilities::default();
        caps.set.insert(Capability::User);
        caps
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.set.contains(&cap)
    }

    pub fn insert(&mut self, cap: Capability) {
        self.set.insert(cap);
    }

    /// Parse one `CAPA` response line.
    pub fn parse_line(&mut self, line: &str) {
        let mut words = line.split_whitespace();
        let keyword = match words.next() {
            Some(w) => w.to_uppercase(),
            None => return,
        };
        match keyword.as_str() {
            "USER" => {
                self.set.insert(Capability::User);
            }
            "APOP" => {
                // Not an RFC 2449 keyword, but some servers list it.
                self.set.insert(Capability::Apop);
            }
            "SASL" => {
                self.set.insert(Capability::Sasl);
                for mech in words {
                    self.auth_mechanisms.push(mech.to_uppercase());
                }
            }
            "STLS" => {
                self.set.insert(Capability::Stls);
            }
            "TOP" => {
                self.set.insert(Capability::Top);
            }
            "UIDL" => {
                self.set.insert(Capability::Uidl);
            }
            "PIPELINING" => {
                self.set.insert(Capability::Pipelining);
            }
            "RESP-CODES" => {
                self.set.insert(Capability::ResponseCodes);
            }
            "EXPIRE" => {
                self.set.insert(Capability::Expire);
                match words.next() {
                    Some(arg) if arg.eq_ignore_ascii_case("NEVER") => self.expire_days = -1,
                    Some(arg) => self.expire_days = arg.parse().unwrap_or(0),
                    None => {}
                }
            }
            "LOGIN-DELAY" => {
                self.set.insert(Capability::LoginDelay);
                if let Some(arg) = words.next() {
                    self.login_delay = arg.parse().unwrap_or(0);
                }
            }
            "IMPLEMENTATION" => {
                let rest: Vec<&str> = words.collect();
                if !rest.is_empty() {
                    self.implementation = Some(rest.join(" "));
                }
            }
            "LANG" => {
                self.set.insert(Capability::Lang);
            }
            "UTF8" => {
                self.set.insert(Capability::Utf8);
                if words.any(|w| w.eq_ignore_ascii_case("USER")) {
                    self.set.insert(Capability::Utf8User);
                }
            }
            _ => {
                self.extensions.push(line.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(lines: &[&str]) -> Capabilities {
        let mut caps = Capabilities::default();
        for line in lines {
            caps.parse_line(line);
        }
        caps
    }

    #[test]
    fn basic_flags() {
        let caps = parse(&["USER", "TOP", "UIDL", "PIPELINING", "STLS", "RESP-CODES"]);
        for cap in [
            Capability::User,
            Capability::Top,
            Capability::Uidl,
            Capability::Pipelining,
            Capability::Stls,
            Capability::ResponseCodes,
        ] {
            assert!(caps.has(cap), "{:?} missing", cap);
        }
        assert!(!caps.has(Capability::Sasl));
    }

    #[test]
    fn sasl_mechanisms_in_order() {
        let caps = parse(&["SASL PLAIN LOGIN XOAUTH2 NTLM"]);
        assert!(caps.has(Capability::Sasl));
        assert_eq!(caps.auth_mechanisms, ["PLAIN", "LOGIN", "XOAUTH2", "NTLM"]);
    }

    #[test]
    fn expire_days_and_never() {
        assert_eq!(parse(&["EXPIRE 31"]).expire_days, 31);
        assert_eq!(parse(&["EXPIRE NEVER"]).expire_days, -1);
        assert_eq!(Capabilities::default().expire_days, 0);
    }

    #[test]
    fn login_delay_seconds() {
        let caps = parse(&["LOGIN-DELAY 900"]);
        assert!(caps.has(Capability::LoginDelay));
        assert_eq!(caps.login_delay, 900);
    }

    #[test]
    fn implementation_keeps_spaces() {
        let caps = parse(&["IMPLEMENTATION Shrubbery Pop3d 2.1"]);
        assert_eq!(caps.implementation.as_deref(), Some("Shrubbery Pop3d 2.1"));
    }

    #[test]
    fn utf8_with_user_argument() {
        let caps = parse(&["UTF8 USER"]);
        assert!(caps.has(Capability::Utf8));
        assert!(caps.has(Capability::Utf8User));
        let bare = parse(&["UTF8"]);
        assert!(bare.has(Capability::Utf8));
        assert!(!bare.has(Capability::Utf8User));
    }

    #[test]
    fn unknown_keywords_kept_verbatim() {
        let caps = parse(&["X-SPECIAL fast lane", "USER"]);
        assert_eq!(caps.extensions, ["X-SPECIAL fast lane"]);
        assert!(caps.has(Capability::User));
    }

    #[test]
    fn fallback_is_user_only() {
        let caps = Capabilities::fallback();
        assert!(caps.has(Capability::User));
        assert!(!caps.has(Capability::Uidl));
        assert!(caps.auth_mechanisms.is_empty());
    }
}
