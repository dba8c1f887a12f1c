/*
 * blocking.rs
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

//! Blocking facade over the async client for callers without their own
//! async context. Each operation is `block_on` against a shared runtime
//! handle; both variants run the identical state machine.
//!
//! Must not be called from inside a runtime worker thread.

use std::io::Write;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::capabilities::Capabilities;
use crate::client;
use crate::client::{ConnectedEvent, DisconnectedEvent};
use crate::command::CancelToken;
use crate::engine::ConnectionState;
use crate::error::Pop3Error;
use crate::options::SecurityMode;
use crate::sasl::SaslMechanism;

/// Blocking POP3 client.
pub struct Pop3Client {
    inner: client::Pop3Client,
    handle: Handle,
}

impl Pop3Client {
    pub fn new(handle: Handle) -> Self {
        Self {
            inner: client::Pop3Client::new(),
            handle,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.inner.set_timeout(timeout);
    }

    pub fn set_protocol_logger(&mut self, sink: Box<dyn Write + Send>, redact_secrets: bool) {
        self.inner.set_protocol_logger(sink, redact_secrets);
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel_token()
    }

    pub fn on_connected(&mut self, handler: impl Fn(&ConnectedEvent) + Send + Sync + 'static) {
        self.inner.on_connected(handler);
    }

    pub fn on_disconnected(
        &mut self,
        handler: impl Fn(&DisconnectedEvent) + Send + Sync + 'static,
    ) {
        self.inner.on_disconnected(handler);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }

    pub fn is_secure(&self) -> bool {
        self.inner.is_secure()
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.inner.capabilities()
    }

    pub fn count(&self) -> u32 {
        self.inner.count()
    }

    pub fn size(&self) -> u64 {
        self.inner.size()
    }

    pub fn connect(&mut self, host: &str, port: u16, mode: SecurityMode) -> Result<(), Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.connect(host, port, mode))
    }

    pub fn authenticate(&mut self, user: &str, pass: &str) -> Result<(), Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.authenticate(user, pass))
    }

    pub fn authenticate_mechanism(
        &mut self,
        mech: &mut dyn SaslMechanism,
    ) -> Result<(), Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.authenticate_mechanism(mech))
    }

    pub fn enable_utf8(&mut self) -> Result<(), Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.enable_utf8())
    }

    pub fn noop(&mut self) -> Result<(), Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.noop())
    }

    pub fn message_count(&mut self) -> Result<u32, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.message_count())
    }

    pub fn message_size(&mut self, index: usize) -> Result<u64, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.message_size(index))
    }

    pub fn message_sizes(&mut self) -> Result<Vec<u64>, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.message_sizes())
    }

    pub fn message_uid(&mut self, index: usize) -> Result<String, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.message_uid(index))
    }

    pub fn message_uids(&mut self) -> Result<Vec<String>, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.message_uids())
    }

    pub fn retrieve(&mut self, index: usize) -> Result<Vec<u8>, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.retrieve(index))
    }

    pub fn retrieve_headers(&mut self, index: usize) -> Result<Vec<u8>, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.retrieve_headers(index))
    }

    pub fn retrieve_top(&mut self, index: usize, lines: u32) -> Result<Vec<u8>, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.retrieve_top(index, lines))
    }

    pub fn retrieve_stream<F>(&mut self, index: usize, on_chunk: F) -> Result<(), Pop3Error>
    where
        F: FnMut(&[u8]),
    {
        let handle = self.handle.clone();
        handle.block_on(self.inner.retrieve_stream(index, on_chunk))
    }

    pub fn retrieve_messages(&mut self, indexes: &[usize]) -> Result<Vec<Vec<u8>>, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.retrieve_messages(indexes))
    }

    pub fn retrieve_many_headers(&mut self, indexes: &[usize]) -> Result<Vec<Vec<u8>>, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.retrieve_many_headers(indexes))
    }

    pub fn delete(&mut self, index: usize) -> Result<(), Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.delete(index))
    }

    pub fn delete_messages(&mut self, indexes: &[usize]) -> Result<(), Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.delete_messages(indexes))
    }

    pub fn reset(&mut self) -> Result<(), Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.reset())
    }

    pub fn languages(&mut self) -> Result<Vec<(String, String)>, Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.languages())
    }

    pub fn set_language(&mut self, tag: &str) -> Result<(), Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.set_language(tag))
    }

    pub fn disconnect(&mut self, quit: bool) -> Result<(), Pop3Error> {
        let handle = self.handle.clone();
        handle.block_on(self.inner.disconnect(quit))
    }
}
