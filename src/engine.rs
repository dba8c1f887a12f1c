/*
 * engine.rs
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

//! Protocol engine: owns the transport, the capability set, and the
//! connection state; executes commands and pipelined groups; drives the
//! SASL exchange.
//!
//! Error discipline: transport errors, timeouts, framing errors, and
//! mid-command cancellation close the session. A `-ERR` reply or a parse
//! failure inside a well-framed response leaves it open.

use std::time::Duration;

use bytes::Bytes;
use log::debug;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::capabilities::{Capabilities, Capability};
use crate::command::{CancelToken, Command, CommandKind, CommandStatus, Reply};
use crate::error::{Pop3Error, ResponseCode};
use crate::logger::{ProtocolLogger, Redaction};
use crate::reader::{LineBuffer, PayloadReader};
use crate::sasl::{base64_decode, base64_encode, SaslMechanism};

/// Upper bound on commands flushed in one pipelined write, capping the
/// memory held for queued responses.
pub(crate) const MAX_PIPELINE: usize = 100;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Greeted, not authenticated.
    Connected,
    /// Authenticated; messages can be read and deleted.
    Transaction,
    /// QUIT sent, waiting for the final reply.
    Closing,
}

/// One parsed status line.
pub(crate) struct StatusResponse {
    pub ok: bool,
    pub text: String,
    pub code: Option<ResponseCode>,
}

/// Parse `+OK ...` / `-ERR ...`, extracting the bracketed response code
/// when the capability was negotiated. Returns `None` for anything else.
fn parse_status(line: &[u8], with_codes: bool) -> Option<StatusResponse> {
    let text = String::from_utf8_lossy(line);
    let (ok, rest) = if let Some(rest) = text.strip_prefix("+OK") {
        (true, rest)
    } else if let Some(rest) = text.strip_prefix("-ERR") {
        (false, rest)
    } else {
        return None;
    };
    let mut rest = rest.trim_start();
    let mut code = None;
    if with_codes && rest.starts_with('[') {
        if let Some(end) = rest.find(']') {
            code = Some(ResponseCode::parse(&rest[1..end]));
            rest = rest[end + 1..].trim_start();
        }
    }
    Some(StatusResponse {
        ok,
        text: rest.trim_end().to_string(),
        code,
    })
}

/// APOP timestamp: the first `<...@...>` in the greeting, raw bytes with
/// brackets, whitespace untouched.
fn extract_timestamp(line: &[u8]) -> Option<Vec<u8>> {
    let open = line.iter().position(|&b| b == b'<')?;
    let close = open + line[open..].iter().position(|&b| b == b'>')?;
    if line[open..close].contains(&b'@') {
        Some(line[open..=close].to_vec())
    } else {
        None
    }
}

enum IoOutcome<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

async fn guarded<F, T>(cancel: &CancelToken, dur: Duration, fut: F) -> IoOutcome<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        _ = cancel.cancelled() => IoOutcome::Cancelled,
        r = timeout(dur, fut) => match r {
            Ok(v) => IoOutcome::Done(v),
            Err(_) => IoOutcome::TimedOut,
        },
    }
}

/// The protocol engine. Exclusive owner of the transport and the
/// capability set; the facade holds it behind its state checks.
pub(crate) struct Engine<S> {
    stream: S,
    rbuf: LineBuffer,
    state: ConnectionState,
    caps: Capabilities,
    apop_timestamp: Option<Vec<u8>>,
    logger: Option<ProtocolLogger>,
    timeout: Duration,
    cancel: CancelToken,
}

/// Engine state carried across a transport swap (STLS upgrade).
pub(crate) struct DetachedEngine {
    state: ConnectionState,
    caps: Capabilities,
    apop_timestamp: Option<Vec<u8>>,
    logger: Option<ProtocolLogger>,
    timeout: Duration,
    cancel: CancelToken,
}

impl DetachedEngine {
    pub fn attach<T>(self, stream: T) -> Engine<T> {
        Engine {
            stream,
            rbuf: LineBuffer::new(),
            state: self.state,
            caps: self.caps,
            apop_timestamp: self.apop_timestamp,
            logger: self.logger,
            timeout: self.timeout,
            cancel: self.cancel,
        }
    }
}

impl<S> Engine<S> {
    pub fn new(
        stream: S,
        timeout: Duration,
        logger: Option<ProtocolLogger>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            stream,
            rbuf: LineBuffer::new(),
            state: ConnectionState::Disconnected,
            caps: Capabilities::default(),
            apop_timestamp: None,
            logger,
            timeout,
            cancel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn capabilities_mut(&mut self) -> &mut Capabilities {
        &mut self.caps
    }

    pub fn apop_timestamp(&self) -> Option<&[u8]> {
        self.apop_timestamp.as_deref()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Hand back the transport for an in-place TLS upgrade.
    pub fn detach(self) -> (S, DetachedEngine) {
        (
            self.stream,
            DetachedEngine {
                state: self.state,
                caps: self.caps,
                apop_timestamp: self.apop_timestamp,
                logger: self.logger,
                timeout: self.timeout,
                cancel: self.cancel,
            },
        )
    }

    fn close(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!("pop3: session closed");
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl<S> Engine<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), Pop3Error> {
        let cancel = self.cancel.clone();
        let dur = self.timeout;
        let outcome = {
            let stream = &mut self.stream;
            guarded(&cancel, dur, async move {
                stream.write_all(bytes).await?;
                stream.flush().await
            })
            .await
        };
        match outcome {
            IoOutcome::Done(Ok(())) => Ok(()),
            IoOutcome::Done(Err(e)) => {
                self.close();
                Err(Pop3Error::Io(e))
            }
            IoOutcome::TimedOut => {
                self.close();
                Err(Pop3Error::timeout())
            }
            IoOutcome::Cancelled => {
                self.close();
                Err(Pop3Error::Cancelled)
            }
        }
    }

    /// Read one response line; logged as server traffic. Any failure here
    /// is fatal: the framing can no longer be trusted.
    async fn read_line(&mut self) -> Result<Bytes, Pop3Error> {
        let cancel = self.cancel.clone();
        let dur = self.timeout;
        let outcome = {
            let stream = &mut self.stream;
            let rbuf = &mut self.rbuf;
            guarded(&cancel, dur, rbuf.read_line(stream)).await
        };
        match outcome {
            IoOutcome::Done(Ok(line)) => {
                if let Some(log) = self.logger.as_mut() {
                    log.server_line(&line);
                }
                Ok(line)
            }
            IoOutcome::Done(Err(e)) => {
                self.close();
                Err(e)
            }
            IoOutcome::TimedOut => {
                self.close();
                Err(Pop3Error::timeout())
            }
            IoOutcome::Cancelled => {
                self.close();
                Err(Pop3Error::Cancelled)
            }
        }
    }

    /// Consume one multi-line payload, invoking `on_line` per unstuffed
    /// content line (without CRLF).
    async fn read_payload_lines<F>(&mut self, mut on_line: F) -> Result<(), Pop3Error>
    where
        F: FnMut(&[u8]),
    {
        let cancel = self.cancel.clone();
        let dur = self.timeout;
        let result = {
            let stream = &mut self.stream;
            let rbuf = &mut self.rbuf;
            let logger = &mut self.logger;
            let mut payload = PayloadReader::new(stream, rbuf);
            loop {
                match guarded(&cancel, dur, payload.next_line()).await {
                    IoOutcome::Done(Ok(Some(line))) => {
                        if let Some(log) = logger.as_mut() {
                            log.server_line(&line);
                        }
                        on_line(&line);
                    }
                    IoOutcome::Done(Ok(None)) => break Ok(()),
                    IoOutcome::Done(Err(e)) => break Err(e),
                    IoOutcome::TimedOut => break Err(Pop3Error::timeout()),
                    IoOutcome::Cancelled => break Err(Pop3Error::Cancelled),
                }
            }
        };
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Log and send one client line (CRLF appended).
    async fn send_client_line(&mut self, line: &[u8], redaction: Redaction) -> Result<(), Pop3Error> {
        if let Some(log) = self.logger.as_mut() {
            log.client_line(line, redaction);
        }
        let mut wire = Vec::with_capacity(line.len() + 2);
        wire.extend_from_slice(line);
        wire.extend_from_slice(b"\r\n");
        self.write_all(&wire).await
    }

    /// Read the greeting, capture the APOP timestamp, move to `Connected`.
    pub async fn read_greeting(&mut self) -> Result<(), Pop3Error> {
        let line = self.read_line().await?;
        let status = match parse_status(&line, false) {
            Some(s) => s,
            None => {
                self.close();
                return Err(Pop3Error::protocol(format!(
                    "malformed greeting: {}",
                    String::from_utf8_lossy(&line)
                )));
            }
        };
        if !status.ok {
            self.close();
            return Err(Pop3Error::protocol(format!(
                "server refused connection: {}",
                status.text
            )));
        }
        self.apop_timestamp = extract_timestamp(&line);
        self.state = ConnectionState::Connected;
        debug!(
            "pop3: greeting accepted (apop timestamp: {})",
            self.apop_timestamp.is_some()
        );
        Ok(())
    }

    /// Run one command and return its typed reply.
    pub async fn run(&mut self, cmd: Command) -> Result<Reply, Pop3Error> {
        let mut replies = self.run_batch(vec![cmd]).await?;
        Ok(replies.pop().expect("one reply per batch command"))
    }

    /// Run a group of commands. With `PIPELINING` the group is flushed in
    /// bounded chunks of one write each; replies are consumed in FIFO
    /// order. On a `-ERR` mid-group the remaining responses are still
    /// read before the first error is surfaced, and the session stays up.
    pub async fn run_batch(&mut self, mut cmds: Vec<Command>) -> Result<Vec<Reply>, Pop3Error> {
        if self.state == ConnectionState::Disconnected {
            return Err(Pop3Error::NotConnected);
        }
        if self.cancel.is_cancelled() {
            // Between commands: clean abort, session stays usable.
            return Err(Pop3Error::Cancelled);
        }
        let group = if self.caps.has(Capability::Pipelining) {
            MAX_PIPELINE
        } else {
            1
        };
        let mut replies = Vec::with_capacity(cmds.len());
        let mut first_err: Option<Pop3Error> = None;
        let mut idx = 0;
        while idx < cmds.len() {
            let end = (idx + group).min(cmds.len());
            let mut wire = Vec::new();
            for cmd in &mut cmds[idx..end] {
                wire.extend_from_slice(&cmd.bytes);
                cmd.status = CommandStatus::Active;
            }
            if let Some(log) = self.logger.as_mut() {
                for cmd in &cmds[idx..end] {
                    log.client_line(cmd.logged_line(), cmd.redaction);
                }
            }
            self.write_all(&wire).await?;
            for cmd in &mut cmds[idx..end] {
                match self.consume(cmd).await {
                    Ok(reply) => {
                        cmd.status = CommandStatus::Ok;
                        replies.push(reply);
                    }
                    Err(e) => {
                        cmd.status = match e {
                            Pop3Error::Command { .. } => CommandStatus::Err,
                            _ => CommandStatus::ProtocolError,
                        };
                        if self.state == ConnectionState::Disconnected {
                            // Framing or transport broke: nothing left to drain.
                            return Err(e);
                        }
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                    }
                }
            }
            idx = end;
        }
        match first_err {
            Some(e) => {
                let ok = cmds
                    .iter()
                    .filter(|c| c.status == CommandStatus::Ok)
                    .count();
                debug!("pop3: batch failed, {} of {} commands ok", ok, cmds.len());
                Err(e)
            }
            None => Ok(replies),
        }
    }

    /// Run one `RETR`/`TOP`, streaming payload chunks (each content line
    /// followed by its CRLF) without buffering the message.
    pub async fn run_streaming<F>(&mut self, cmd: Command, mut on_chunk: F) -> Result<(), Pop3Error>
    where
        F: FnMut(&[u8]),
    {
        if self.state == ConnectionState::Disconnected {
            return Err(Pop3Error::NotConnected);
        }
        if self.cancel.is_cancelled() {
            return Err(Pop3Error::Cancelled);
        }
        if let Some(log) = self.logger.as_mut() {
            log.client_line(cmd.logged_line(), cmd.redaction);
        }
        self.write_all(&cmd.bytes).await?;
        let status = self.read_status().await?;
        if !status.ok {
            return Err(Pop3Error::Command {
                message: status.text,
                code: status.code,
            });
        }
        self.read_payload_lines(|line| {
            on_chunk(line);
            on_chunk(b"\r\n");
        })
        .await
    }

    async fn read_status(&mut self) -> Result<StatusResponse, Pop3Error> {
        let line = self.read_line().await?;
        let with_codes = self.caps.has(Capability::ResponseCodes);
        match parse_status(&line, with_codes) {
            Some(s) => Ok(s),
            None => {
                self.close();
                Err(Pop3Error::protocol(format!(
                    "unexpected response: {}",
                    String::from_utf8_lossy(&line)
                )))
            }
        }
    }

    /// Consume exactly one response for `cmd`.
    async fn consume(&mut self, cmd: &Command) -> Result<Reply, Pop3Error> {
        let status = self.read_status().await?;
        if !status.ok {
            return Err(Pop3Error::Command {
                message: status.text,
                code: status.code,
            });
        }
        match cmd.kind {
            CommandKind::Simple => Ok(Reply::Ok),
            CommandKind::Stat => parse_stat(&status.text)
                .ok_or_else(|| Pop3Error::protocol(format!("bad STAT response: {}", status.text))),
            CommandKind::ListOne => parse_numbered(&status.text)
                .map(|(msg_no, size)| Reply::Size { msg_no, size })
                .ok_or_else(|| Pop3Error::protocol(format!("bad LIST response: {}", status.text))),
            CommandKind::UidlOne => parse_uid(&status.text)
                .map(|(msg_no, uid)| Reply::Uid { msg_no, uid })
                .ok_or_else(|| Pop3Error::protocol(format!("bad UIDL response: {}", status.text))),
            CommandKind::ListAll => {
                let mut entries = Vec::new();
                let mut bad = None;
                self.read_payload_lines(|line| {
                    let text = String::from_utf8_lossy(line);
                    match parse_numbered(&text) {
                        Some(entry) => entries.push(entry),
                        None => {
                            if bad.is_none() {
                                bad = Some(text.to_string());
                            }
                        }
                    }
                })
                .await?;
                match bad {
                    Some(line) => Err(Pop3Error::protocol(format!("bad LIST entry: {}", line))),
                    None => Ok(Reply::Sizes(entries)),
                }
            }
            CommandKind::UidlAll => {
                let mut entries = Vec::new();
                let mut bad = None;
                self.read_payload_lines(|line| {
                    let text = String::from_utf8_lossy(line);
                    match parse_uid(&text) {
                        Some(entry) => entries.push(entry),
                        None => {
                            if bad.is_none() {
                                bad = Some(text.to_string());
                            }
                        }
                    }
                })
                .await?;
                match bad {
                    Some(line) => Err(Pop3Error::protocol(format!("bad UIDL entry: {}", line))),
                    None => Ok(Reply::Uids(entries)),
                }
            }
            CommandKind::Capa => {
                let mut caps = Capabilities::default();
                self.read_payload_lines(|line| {
                    caps.parse_line(&String::from_utf8_lossy(line));
                })
                .await?;
                Ok(Reply::Capabilities(caps))
            }
            CommandKind::Retrieve => {
                let mut message = Vec::new();
                self.read_payload_lines(|line| {
                    message.extend_from_slice(line);
                    message.extend_from_slice(b"\r\n");
                })
                .await?;
                Ok(Reply::Message(message))
            }
            CommandKind::LangList => {
                let mut langs = Vec::new();
                self.read_payload_lines(|line| {
                    let text = String::from_utf8_lossy(line);
                    match text.split_once(' ') {
                        Some((tag, desc)) => langs.push((tag.to_string(), desc.to_string())),
                        None => langs.push((text.to_string(), String::new())),
                    }
                })
                .await?;
                Ok(Reply::Languages(langs))
            }
        }
    }

    /// Issue `CAPA` and replace the capability set wholesale. A `-ERR`
    /// falls back to `USER`-only; `UIDL` gets probed later.
    pub async fn query_capabilities(&mut self) -> Result<(), Pop3Error> {
        let result = self.run(Command::line("CAPA", CommandKind::Capa)).await;
        let mut caps = match result {
            Ok(Reply::Capabilities(caps)) => caps,
            Ok(_) => return Err(Pop3Error::protocol("CAPA produced no capability list")),
            Err(Pop3Error::Command { .. }) => Capabilities::fallback(),
            Err(e) => return Err(e),
        };
        if self.apop_timestamp.is_some() {
            caps.insert(Capability::Apop);
        }
        self.caps = caps;
        debug!(
            "pop3: capabilities refreshed ({} mechanisms)",
            self.caps.auth_mechanisms.len()
        );
        Ok(())
    }

    /// `USER`/`PASS` login. A `-ERR` to either step is an auth failure.
    pub async fn login_user_pass(&mut self, user: &str, pass: &str) -> Result<(), Pop3Error> {
        let user_cmd = Command::redacted(
            &format!("USER {}", user),
            CommandKind::Simple,
            Redaction::Arguments,
        );
        self.run(user_cmd).await.map_err(auth_error)?;
        let pass_cmd = Command::redacted(
            &format!("PASS {}", pass),
            CommandKind::Simple,
            Redaction::Arguments,
        );
        self.run(pass_cmd).await.map_err(auth_error)?;
        Ok(())
    }

    /// APOP login: `APOP <user> <hex(md5(timestamp + password))>`, the
    /// timestamp taken raw from the greeting, brackets included.
    pub async fn login_apop(&mut self, user: &str, pass: &str) -> Result<(), Pop3Error> {
        let ts = match &self.apop_timestamp {
            Some(ts) => ts.clone(),
            None => return Err(Pop3Error::NotSupported("APOP".to_string())),
        };
        let mut hasher = Md5::new();
        hasher.update(&ts);
        hasher.update(pass.as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(32);
        for byte in digest {
            hex.push_str(&format!("{:02x}", byte));
        }
        let cmd = Command::redacted(
            &format!("APOP {} {}", user, hex),
            CommandKind::Simple,
            Redaction::Arguments,
        );
        self.run(cmd).await.map_err(auth_error)?;
        Ok(())
    }

    /// Drive one SASL mechanism through the `AUTH` exchange (RFC 5034).
    pub async fn authenticate_sasl(
        &mut self,
        mech: &mut dyn SaslMechanism,
    ) -> Result<(), Pop3Error> {
        if self.state == ConnectionState::Disconnected {
            return Err(Pop3Error::NotConnected);
        }
        if self.cancel.is_cancelled() {
            return Err(Pop3Error::Cancelled);
        }
        let mut first = format!("AUTH {}", mech.name());
        if mech.supports_initial_response() {
            if let Some(ir) = mech.initial_response() {
                first.push(' ');
                first.push_str(&base64_encode(&ir));
            }
        }
        self.send_client_line(first.as_bytes(), Redaction::Arguments)
            .await?;
        loop {
            let line = self.read_line().await?;
            if line.starts_with(b"+OK") {
                debug!("pop3: {} authentication accepted", mech.name());
                return Ok(());
            }
            if line.starts_with(b"-ERR") {
                let with_codes = self.caps.has(Capability::ResponseCodes);
                let status = parse_status(&line, with_codes)
                    .unwrap_or_else(|| StatusResponse {
                        ok: false,
                        text: String::new(),
                        code: None,
                    });
                return Err(Pop3Error::Auth {
                    message: status.text,
                    code: status.code,
                });
            }
            if line.first() == Some(&b'+') {
                // Server challenge: "+ <base64>" or a bare "+".
                let challenge_b64 = String::from_utf8_lossy(&line[1..]).trim().to_string();
                let decoded = match base64_decode(&challenge_b64) {
                    Ok(d) => d,
                    Err(e) => return self.abort_sasl(e.to_string()).await,
                };
                let response = if mech.is_complete() {
                    // Keep answering with empty responses until the
                    // server terminates the exchange.
                    Vec::new()
                } else {
                    match mech.challenge(&decoded) {
                        Ok(r) => r,
                        Err(e) => return self.abort_sasl(e.to_string()).await,
                    }
                };
                self.send_client_line(base64_encode(&response).as_bytes(), Redaction::FullLine)
                    .await?;
                continue;
            }
            self.close();
            return Err(Pop3Error::protocol(format!(
                "unexpected AUTH response: {}",
                String::from_utf8_lossy(&line)
            )));
        }
    }

    /// Cancel a failed SASL exchange with `*` and surface an auth error.
    async fn abort_sasl(&mut self, message: String) -> Result<(), Pop3Error> {
        self.send_client_line(b"*", Redaction::None).await?;
        let _ = self.read_line().await?;
        Err(Pop3Error::Auth {
            message,
            code: None,
        })
    }
}

/// `auth_error` rewraps a `-ERR` to a credential command as `Auth`.
fn auth_error(e: Pop3Error) -> Pop3Error {
    match e {
        Pop3Error::Command { message, code } => Pop3Error::Auth { message, code },
        other => other,
    }
}

fn parse_stat(text: &str) -> Option<Reply> {
    let mut words = text.split_whitespace();
    let count: u32 = words.next()?.parse().ok()?;
    let size: u64 = words.next()?.parse().ok()?;
    Some(Reply::Stat { count, size })
}

fn parse_numbered(text: &str) -> Option<(u32, u64)> {
    let mut words = text.split_whitespace();
    let msg_no: u32 = words.next()?.parse().ok()?;
    let size: u64 = words.next()?.parse().ok()?;
    Some((msg_no, size))
}

fn parse_uid(text: &str) -> Option<(u32, String)> {
    let mut words = text.split_whitespace();
    let msg_no: u32 = words.next()?.parse().ok()?;
    let uid = words.next()?.to_string();
    Some((msg_no, uid))
}
