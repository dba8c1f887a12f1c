/*
 * client.rs
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

//! The POP3 client: connect, authenticate, STAT/LIST/UIDL/RETR/TOP/DELE,
//! UTF8 and LANG, QUIT.
//!
//! Every operation checks its required connection state before touching
//! the wire. Message indexes are 0-based here and translated to POP3's
//! 1-based sequence numbers at the boundary.

use std::io::Write;
use std::time::Duration;

use log::debug;

use crate::capabilities::{Capabilities, Capability};
use crate::command::{CancelToken, Command, CommandKind, Reply};
use crate::engine::{ConnectionState, Engine};
use crate::error::Pop3Error;
use crate::logger::ProtocolLogger;
use crate::net::Pop3Stream;
use crate::options::{compute_defaults, SecurityMode, StartTlsPolicy};
use crate::sasl::{password_mechanism, SaslMechanism, PASSWORD_PREFERENCE};

/// Default per-primitive I/O timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Emitted after a successful handshake (greeting, CAPA, optional STLS).
#[derive(Debug, Clone)]
pub struct ConnectedEvent {
    pub host: String,
    pub port: u16,
    pub mode: SecurityMode,
}

/// Emitted after the session closes, gracefully or not.
#[derive(Debug, Clone)]
pub struct DisconnectedEvent {
    pub host: String,
    pub port: u16,
    pub mode: SecurityMode,
    /// True when the close came from `disconnect`, false on failure.
    pub is_requested: bool,
}

type ConnectedHandler = Box<dyn Fn(&ConnectedEvent) + Send + Sync>;
type DisconnectedHandler = Box<dyn Fn(&DisconnectedEvent) + Send + Sync>;

enum AuthPlan {
    Apop,
    Sasl(Box<dyn SaslMechanism>),
    UserPass,
}

/// Async POP3 client.
pub struct Pop3Client {
    engine: Option<Engine<Pop3Stream>>,
    host: String,
    port: u16,
    mode: SecurityMode,
    timeout: Duration,
    cancel: CancelToken,
    /// Installed before connect; moves into the engine for the session.
    logger: Option<ProtocolLogger>,
    secure: bool,
    count: u32,
    size: u64,
    utf8_enabled: bool,
    /// `None` until probed, then the probe verdict (survives re-CAPA).
    uidl_probe: Option<bool>,
    on_connected: Option<ConnectedHandler>,
    on_disconnected: Option<DisconnectedHandler>,
}

impl Default for Pop3Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Pop3Client {
    pub fn new() -> Self {
        Self {
            engine: None,
            host: String::new(),
            port: 0,
            mode: SecurityMode::Auto,
            timeout: DEFAULT_TIMEOUT,
            cancel: CancelToken::new(),
            logger: None,
            secure: false,
            count: 0,
            size: 0,
            utf8_enabled: false,
            uidl_probe: None,
            on_connected: None,
            on_disconnected: None,
        }
    }

    /// Per-primitive I/O timeout for sessions opened after this call.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Install a protocol logger for the next session. With
    /// `redact_secrets` the credential-bearing client lines are masked
    /// before they reach the sink; wire bytes are never altered.
    pub fn set_protocol_logger(&mut self, sink: Box<dyn Write + Send>, redact_secrets: bool) {
        self.logger = Some(ProtocolLogger::new(sink, redact_secrets));
    }

    /// Token cancelling in-flight operations. Cancelling between commands
    /// is clean; cancelling mid-command breaks the session.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn on_connected(&mut self, handler: impl Fn(&ConnectedEvent) + Send + Sync + 'static) {
        self.on_connected = Some(Box::new(handler));
    }

    pub fn on_disconnected(
        &mut self,
        handler: impl Fn(&DisconnectedEvent) + Send + Sync + 'static,
    ) {
        self.on_disconnected = Some(Box::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        self.engine
            .as_ref()
            .map_or(ConnectionState::Disconnected, |e| e.state())
    }

    pub fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnectionState::Transaction
    }

    /// Whether the transport is TLS (implicit or via STLS).
    pub fn is_secure(&self) -> bool {
        self.is_connected() && self.secure
    }

    /// Negotiated capabilities, while connected.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.engine.as_ref().map(|e| e.capabilities())
    }

    /// Message count from the last `STAT`.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Maildrop size in octets from the last `STAT`.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Establish the transport, read the greeting, fetch capabilities,
    /// and upgrade to TLS per the security mode.
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        mode: SecurityMode,
    ) -> Result<(), Pop3Error> {
        if self.is_connected() {
            return Err(Pop3Error::AlreadyConnected);
        }
        let (uri, port, starttls) = compute_defaults(host, port, mode);
        let implicit_tls = uri.starts_with("pops");
        debug!("pop3: connecting to {}", uri);

        let stream = Pop3Stream::connect(host, port, implicit_tls).await?;
        let logger = self.logger.take();
        let mut engine = Engine::new(stream, self.timeout, logger, self.cancel.clone());
        let mut secure = implicit_tls;
        engine.read_greeting().await?;
        engine.query_capabilities().await?;

        if starttls != StartTlsPolicy::No && !secure {
            if engine.capabilities().has(Capability::Stls) {
                engine
                    .run(Command::line("STLS", CommandKind::Simple))
                    .await?;
                let (stream, detached) = engine.detach();
                let tls = match stream {
                    Pop3Stream::Plain(plain) => plain.upgrade_to_tls(host).await?,
                    Pop3Stream::Tls(_) => unreachable!("STLS on a TLS stream"),
                };
                engine = detached.attach(Pop3Stream::Tls(tls));
                secure = true;
                debug!("pop3: STLS upgrade complete");
                engine.query_capabilities().await?;
            } else if starttls == StartTlsPolicy::Mandatory {
                return Err(Pop3Error::NotSupported("STLS".to_string()));
            }
        }

        self.secure = secure;
        self.engine = Some(engine);
        self.host = host.to_string();
        self.port = port;
        self.mode = mode;
        self.count = 0;
        self.size = 0;
        self.utf8_enabled = false;
        self.uidl_probe = None;
        if let Some(handler) = &self.on_connected {
            handler(&ConnectedEvent {
                host: self.host.clone(),
                port,
                mode,
            });
        }
        Ok(())
    }

    /// Authenticate with the best mechanism on offer: APOP when the
    /// greeting carried a timestamp, else the preferred advertised SASL
    /// mechanism, else `USER`/`PASS`. Bad credentials leave the session
    /// connected for another attempt.
    pub async fn authenticate(&mut self, user: &str, pass: &str) -> Result<(), Pop3Error> {
        let plan = {
            let engine = self.engine_pre_auth()?;
            let caps = engine.capabilities();
            if engine.apop_timestamp().is_some() && caps.has(Capability::Apop) {
                AuthPlan::Apop
            } else if let Some(mech) = pick_sasl(caps, user, pass) {
                AuthPlan::Sasl(mech)
            } else if caps.has(Capability::User) {
                AuthPlan::UserPass
            } else {
                return Err(Pop3Error::NotSupported(
                    "no mutually supported authentication mechanism".to_string(),
                ));
            }
        };
        let result = {
            let engine = self.engine_pre_auth()?;
            match plan {
                AuthPlan::Apop => engine.login_apop(user, pass).await,
                AuthPlan::Sasl(mut mech) => engine.authenticate_sasl(mech.as_mut()).await,
                AuthPlan::UserPass => engine.login_user_pass(user, pass).await,
            }
        };
        match result {
            Ok(()) => self.finish_authentication().await,
            Err(e) => self.settle(Err(e)),
        }
    }

    /// Authenticate with an explicit SASL mechanism (highest preference).
    pub async fn authenticate_mechanism(
        &mut self,
        mech: &mut dyn SaslMechanism,
    ) -> Result<(), Pop3Error> {
        let result = {
            let engine = self.engine_pre_auth()?;
            engine.authenticate_sasl(mech).await
        };
        match result {
            Ok(()) => self.finish_authentication().await,
            Err(e) => self.settle(Err(e)),
        }
    }

    /// Servers commonly reveal more capabilities after login; re-issue
    /// `CAPA` before handing the session back.
    async fn finish_authentication(&mut self) -> Result<(), Pop3Error> {
        let result = {
            let engine = match self.engine.as_mut() {
                Some(e) => e,
                None => return Err(Pop3Error::NotConnected),
            };
            engine.set_state(ConnectionState::Transaction);
            engine.query_capabilities().await
        };
        self.settle(result)
    }

    /// Switch the session to UTF-8 (RFC 6856). Pre-authentication only;
    /// idempotent within the pre-auth phase.
    pub async fn enable_utf8(&mut self) -> Result<(), Pop3Error> {
        let engine = self.engine_pre_auth()?;
        if !engine.capabilities().has(Capability::Utf8) {
            return Err(Pop3Error::NotSupported("UTF8".to_string()));
        }
        if self.utf8_enabled {
            return Ok(());
        }
        let result = {
            let engine = self.engine_pre_auth()?;
            engine.run(Command::line("UTF8", CommandKind::Simple)).await
        };
        match self.settle(result) {
            Ok(_) => {
                self.utf8_enabled = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn noop(&mut self) -> Result<(), Pop3Error> {
        let result = {
            let engine = self.engine_transaction()?;
            engine.run(Command::line("NOOP", CommandKind::Simple)).await
        };
        self.settle(result).map(|_| ())
    }

    /// `STAT`: message count and maildrop size, also cached on the client.
    pub async fn message_count(&mut self) -> Result<u32, Pop3Error> {
        let result = {
            let engine = self.engine_transaction()?;
            engine.run(Command::line("STAT", CommandKind::Stat)).await
        };
        match self.settle(result)? {
            Reply::Stat { count, size } => {
                self.count = count;
                self.size = size;
                Ok(count)
            }
            _ => Err(Pop3Error::protocol("STAT produced no statistics")),
        }
    }

    /// `LIST n`: size in octets of one message.
    pub async fn message_size(&mut self, index: usize) -> Result<u64, Pop3Error> {
        let cmd = Command::line(&format!("LIST {}", seqno(index)), CommandKind::ListOne);
        let result = {
            let engine = self.engine_transaction()?;
            engine.run(cmd).await
        };
        match self.settle(result)? {
            Reply::Size { size, .. } => Ok(size),
            _ => Err(Pop3Error::protocol("LIST produced no size")),
        }
    }

    /// `LIST`: sizes of all messages, in sequence order.
    pub async fn message_sizes(&mut self) -> Result<Vec<u64>, Pop3Error> {
        let result = {
            let engine = self.engine_transaction()?;
            engine.run(Command::line("LIST", CommandKind::ListAll)).await
        };
        match self.settle(result)? {
            Reply::Sizes(entries) => Ok(entries.into_iter().map(|(_, size)| size).collect()),
            _ => Err(Pop3Error::protocol("LIST produced no listing")),
        }
    }

    /// `UIDL n`: unique id of one message, probing for support first.
    pub async fn message_uid(&mut self, index: usize) -> Result<String, Pop3Error> {
        self.ensure_uidl().await?;
        let cmd = Command::line(&format!("UIDL {}", seqno(index)), CommandKind::UidlOne);
        let result = {
            let engine = self.engine_transaction()?;
            engine.run(cmd).await
        };
        match self.settle(result)? {
            Reply::Uid { uid, .. } => Ok(uid),
            _ => Err(Pop3Error::protocol("UIDL produced no id")),
        }
    }

    /// `UIDL`: unique ids of all messages, in sequence order.
    pub async fn message_uids(&mut self) -> Result<Vec<String>, Pop3Error> {
        self.ensure_uidl().await?;
        let result = {
            let engine = self.engine_transaction()?;
            engine.run(Command::line("UIDL", CommandKind::UidlAll)).await
        };
        match self.settle(result)? {
            Reply::Uids(entries) => Ok(entries.into_iter().map(|(_, uid)| uid).collect()),
            _ => Err(Pop3Error::protocol("UIDL produced no listing")),
        }
    }

    /// `RETR`: the full message.
    pub async fn retrieve(&mut self, index: usize) -> Result<Vec<u8>, Pop3Error> {
        self.retrieve_command(format!("RETR {}", seqno(index))).await
    }

    /// `TOP n 0`: just the headers.
    pub async fn retrieve_headers(&mut self, index: usize) -> Result<Vec<u8>, Pop3Error> {
        self.retrieve_command(format!("TOP {} 0", seqno(index))).await
    }

    /// `TOP n lines`: headers plus the first body lines.
    pub async fn retrieve_top(&mut self, index: usize, lines: u32) -> Result<Vec<u8>, Pop3Error> {
        self.retrieve_command(format!("TOP {} {}", seqno(index), lines))
            .await
    }

    async fn retrieve_command(&mut self, text: String) -> Result<Vec<u8>, Pop3Error> {
        let result = {
            let engine = self.engine_transaction()?;
            engine.run(Command::line(&text, CommandKind::Retrieve)).await
        };
        match self.settle(result)? {
            Reply::Message(body) => Ok(body),
            _ => Err(Pop3Error::protocol("RETR produced no message")),
        }
    }

    /// `RETR` streamed: `on_chunk` receives each content line with its
    /// CRLF as it is read; the message is never buffered whole.
    pub async fn retrieve_stream<F>(&mut self, index: usize, on_chunk: F) -> Result<(), Pop3Error>
    where
        F: FnMut(&[u8]),
    {
        let cmd = Command::line(&format!("RETR {}", seqno(index)), CommandKind::Retrieve);
        let result = {
            let engine = self.engine_transaction()?;
            engine.run_streaming(cmd, on_chunk).await
        };
        self.settle(result)
    }

    /// Bulk `RETR`, pipelined when the server allows. Results match the
    /// input order; duplicates are preserved; empty input is free.
    pub async fn retrieve_messages(
        &mut self,
        indexes: &[usize],
    ) -> Result<Vec<Vec<u8>>, Pop3Error> {
        self.bulk_retrieve(indexes, |n| format!("RETR {}", n)).await
    }

    /// Bulk `TOP n 0`, pipelined when the server allows.
    pub async fn retrieve_many_headers(
        &mut self,
        indexes: &[usize],
    ) -> Result<Vec<Vec<u8>>, Pop3Error> {
        self.bulk_retrieve(indexes, |n| format!("TOP {} 0", n)).await
    }

    async fn bulk_retrieve<F>(
        &mut self,
        indexes: &[usize],
        render: F,
    ) -> Result<Vec<Vec<u8>>, Pop3Error>
    where
        F: Fn(u32) -> String,
    {
        if indexes.is_empty() {
            return Ok(Vec::new());
        }
        let cmds: Vec<Command> = indexes
            .iter()
            .map(|&i| Command::line(&render(seqno(i)), CommandKind::Retrieve))
            .collect();
        let result = {
            let engine = self.engine_transaction()?;
            engine.run_batch(cmds).await
        };
        let replies = self.settle(result)?;
        Ok(replies
            .into_iter()
            .map(|reply| match reply {
                Reply::Message(body) => body,
                _ => Vec::new(),
            })
            .collect())
    }

    /// `DELE`: mark one message for deletion at `QUIT`.
    pub async fn delete(&mut self, index: usize) -> Result<(), Pop3Error> {
        self.delete_messages(&[index]).await
    }

    /// Bulk `DELE`, pipelined when the server allows.
    pub async fn delete_messages(&mut self, indexes: &[usize]) -> Result<(), Pop3Error> {
        if indexes.is_empty() {
            return Ok(());
        }
        let cmds: Vec<Command> = indexes
            .iter()
            .map(|&i| Command::line(&format!("DELE {}", seqno(i)), CommandKind::Simple))
            .collect();
        let result = {
            let engine = self.engine_transaction()?;
            engine.run_batch(cmds).await
        };
        self.settle(result).map(|_| ())
    }

    /// `RSET`: unmark every message deleted this session.
    pub async fn reset(&mut self) -> Result<(), Pop3Error> {
        let result = {
            let engine = self.engine_transaction()?;
            engine.run(Command::line("RSET", CommandKind::Simple)).await
        };
        self.settle(result).map(|_| ())
    }

    /// `LANG`: the server's available response languages.
    pub async fn languages(&mut self) -> Result<Vec<(String, String)>, Pop3Error> {
        let result = {
            let engine = self.engine_lang()?;
            engine.run(Command::line("LANG", CommandKind::LangList)).await
        };
        match self.settle(result)? {
            Reply::Languages(langs) => Ok(langs),
            _ => Err(Pop3Error::protocol("LANG produced no listing")),
        }
    }

    /// `LANG <tag>`: switch response language.
    pub async fn set_language(&mut self, tag: &str) -> Result<(), Pop3Error> {
        let cmd = Command::line(&format!("LANG {}", tag), CommandKind::Simple);
        let result = {
            let engine = self.engine_lang()?;
            engine.run(cmd).await
        };
        self.settle(result).map(|_| ())
    }

    /// Close the session. With `quit` in the transaction state a `QUIT`
    /// is sent first, committing deletions. Emits `Disconnected` with
    /// `is_requested` set.
    pub async fn disconnect(&mut self, quit: bool) -> Result<(), Pop3Error> {
        let engine = match self.engine.as_mut() {
            Some(e) => e,
            None => return Ok(()),
        };
        if quit && engine.state() == ConnectionState::Transaction {
            engine.set_state(ConnectionState::Closing);
            let _ = engine.run(Command::line("QUIT", CommandKind::Simple)).await;
        }
        self.teardown(true);
        Ok(())
    }

    /// Probe `UIDL` with `UIDL 1` when `CAPA` did not advertise it. The
    /// verdict sticks for the rest of the session.
    async fn ensure_uidl(&mut self) -> Result<(), Pop3Error> {
        {
            let engine = self.engine_transaction()?;
            if engine.capabilities().has(Capability::Uidl) {
                return Ok(());
            }
        }
        match self.uidl_probe {
            Some(true) => return Ok(()),
            Some(false) => return Err(Pop3Error::NotSupported("UIDL".to_string())),
            None => {}
        }
        debug!("pop3: probing UIDL support");
        let result = {
            let engine = self.engine_transaction()?;
            engine
                .run(Command::line("UIDL 1", CommandKind::UidlOne))
                .await
        };
        match result {
            Ok(_) => {
                self.uidl_probe = Some(true);
                if let Some(engine) = self.engine.as_mut() {
                    engine.capabilities_mut().insert(Capability::Uidl);
                }
                Ok(())
            }
            Err(Pop3Error::Command { .. }) => {
                self.uidl_probe = Some(false);
                Err(Pop3Error::NotSupported("UIDL".to_string()))
            }
            Err(e) => self.settle(Err(e)),
        }
    }

    fn engine_pre_auth(&mut self) -> Result<&mut Engine<Pop3Stream>, Pop3Error> {
        match self.engine.as_mut() {
            None => Err(Pop3Error::NotConnected),
            Some(e) => match e.state() {
                ConnectionState::Connected => Ok(e),
                ConnectionState::Transaction => Err(Pop3Error::AlreadyAuthenticated),
                _ => Err(Pop3Error::NotConnected),
            },
        }
    }

    fn engine_transaction(&mut self) -> Result<&mut Engine<Pop3Stream>, Pop3Error> {
        match self.engine.as_mut() {
            None => Err(Pop3Error::NotConnected),
            Some(e) => match e.state() {
                ConnectionState::Transaction => Ok(e),
                ConnectionState::Connected => Err(Pop3Error::NotAuthenticated),
                _ => Err(Pop3Error::NotConnected),
            },
        }
    }

    /// `LANG` is usable in any post-greeting state, given the capability.
    fn engine_lang(&mut self) -> Result<&mut Engine<Pop3Stream>, Pop3Error> {
        match self.engine.as_mut() {
            None => Err(Pop3Error::NotConnected),
            Some(e) => match e.state() {
                ConnectionState::Connected | ConnectionState::Transaction => {
                    if e.capabilities().has(Capability::Lang) {
                        Ok(e)
                    } else {
                        Err(Pop3Error::NotSupported("LANG".to_string()))
                    }
                }
                _ => Err(Pop3Error::NotConnected),
            },
        }
    }

    /// Tear down after a fatal error, emitting the disconnect event.
    fn settle<T>(&mut self, result: Result<T, Pop3Error>) -> Result<T, Pop3Error> {
        let broken = self
            .engine
            .as_ref()
            .is_some_and(|e| e.state() == ConnectionState::Disconnected);
        if broken {
            self.teardown(false);
        }
        result
    }

    fn teardown(&mut self, is_requested: bool) {
        if self.engine.take().is_none() {
            return;
        }
        debug!(
            "pop3: disconnected from {}:{} (requested: {})",
            self.host, self.port, is_requested
        );
        self.secure = false;
        self.count = 0;
        self.size = 0;
        self.utf8_enabled = false;
        self.uidl_probe = None;
        if let Some(handler) = &self.on_disconnected {
            handler(&DisconnectedEvent {
                host: self.host.clone(),
                port: self.port,
                mode: self.mode,
                is_requested,
            });
        }
    }
}

/// 0-based caller index to 1-based POP3 sequence number.
fn seqno(index: usize) -> u32 {
    index as u32 + 1
}

fn pick_sasl(caps: &Capabilities, user: &str, pass: &str) -> Option<Box<dyn SaslMechanism>> {
    for name in PASSWORD_PREFERENCE {
        if caps.auth_mechanisms.iter().any(|m| m == name) {
            return password_mechanism(name, user, pass);
        }
    }
    None
}
