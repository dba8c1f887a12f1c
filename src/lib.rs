/*
 * lib.rs
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

//! Async POP3 mail retrieval client (RFC 1939, 2449, 5034, 6856).
//!
//! Capability negotiation, USER/PASS, APOP and SASL authentication, STLS
//! upgrade, pipelined bulk operations, streamed message bodies, and a
//! redacting protocol logger. Message parsing is out of scope; retrieval
//! yields raw RFC 5322 bytes for whatever MIME parser sits downstream.
//!
//! ```no_run
//! use cassetta::{Pop3Client, SecurityMode};
//!
//! # async fn example() -> Result<(), cassetta::Pop3Error> {
//! let mut client = Pop3Client::new();
//! client.connect("pop.example.com", 0, SecurityMode::Auto).await?;
//! client.authenticate("alice", "hunter2").await?;
//! let count = client.message_count().await?;
//! for i in 0..count as usize {
//!     let message = client.retrieve(i).await?;
//!     // hand `message` to a MIME parser
//!     let _ = message;
//! }
//! client.disconnect(true).await?;
//! # Ok(())
//! # }
//! ```

pub mod blocking;
mod capabilities;
mod client;
mod command;
mod engine;
mod error;
mod logger;
mod net;
mod options;
mod reader;
pub mod sasl;

pub use capabilities::{Capabilities, Capability};
pub use client::{ConnectedEvent, DisconnectedEvent, Pop3Client, DEFAULT_TIMEOUT};
pub use command::{CancelToken, CommandStatus};
pub use engine::ConnectionState;
pub use error::{Pop3Error, ResponseCode};
pub use logger::{ProtocolLogger, Redaction};
pub use net::{PlainStream, Pop3Stream, TlsStreamWrapper};
pub use options::{compute_defaults, SecurityMode, StartTlsPolicy};
pub use reader::{LineBuffer, PayloadReader, MAX_LINE_LEN};
