/*
 * options.rs
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

//! Security modes and the connect defaults: scheme, effective port, and
//! whether to attempt STLS.

/// How the connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// Plain connection, no TLS.
    None,
    /// Pick by port: 995 means implicit TLS, otherwise STLS when offered.
    Auto,
    /// TLS handshake immediately on connect (pop3s).
    SslOnConnect,
    /// Plain connect, then STLS; fail if the server cannot upgrade.
    StartTls,
    /// Plain connect, then STLS if the server offers it.
    StartTlsWhenAvailable,
}

/// Whether and how hard to try STLS after the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTlsPolicy {
    No,
    /// `NotSupported` if the server does not advertise `STLS`.
    Mandatory,
    WhenAvailable,
}

/// Resolve a host/port/mode triple to the session URI, the effective
/// port, and the STLS policy. Port 0 selects the scheme default (110
/// plain, 995 implicit TLS).
pub fn compute_defaults(host: &str, port: u16, mode: SecurityMode) -> (String, u16, StartTlsPolicy) {
    let (scheme, port, starttls) = match mode {
        SecurityMode::None => ("pop", default_port(port, 110), StartTlsPolicy::No),
        SecurityMode::SslOnConnect => ("pops", default_port(port, 995), StartTlsPolicy::No),
        SecurityMode::StartTls => ("pop", default_port(port, 110), StartTlsPolicy::Mandatory),
        SecurityMode::StartTlsWhenAvailable => {
            ("pop", default_port(port, 110), StartTlsPolicy::WhenAvailable)
        }
        SecurityMode::Auto => {
            if port == 995 {
                ("pops", 995, StartTlsPolicy::No)
            } else {
                ("pop", default_port(port, 110), StartTlsPolicy::WhenAvailable)
            }
        }
    };
    (format!("{}://{}:{}", scheme, host, port), port, starttls)
}

fn default_port(port: u16, fallback: u16) -> u16 {
    if port == 0 {
        fallback
    } else {
        port
    }
}
