/*
 *
 *  * Copyright (c) 2025 Couchbase, Inc.
 *  *
 *  * Licensed under the Apache License, Version 2.0 (the "License");
 *  * you may not use this file except in compliance with the License.
 *  * You may obtain a copy of the License at
 *  *
 *  *    http://www.apache.org/licenses/LICENSE-2.0
 *  *
 *  * Unless required by applicable law or agreed to in writing, software
 *  * distributed under the License is distributed on an "AS IS" BASIS,
 *  * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  * See the License for the specific language governing permissions and
 *  * limitations under the License.
 *
 */

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use log::{trace, warn};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::codec::{Decoder, Encoder, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::address::{Address, CandidateList};
use crate::authenticator::PasswordAuthenticator;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::log::LogContext;
use crate::memdx::codec::KeyValueCodec;
use crate::memdx::connection::{ConnectOptions, Connection};
use crate::memdx::error::{Error as MemdxError, ServerError};
use crate::memdx::opcode::OpCode;
use crate::memdx::packet::{RequestPacket, ResponsePacket};
use crate::memdx::status::Status;
use crate::multiplex::{CommandLog, LoggedEntry};
use crate::sasl::{plain, scram, Mechanism};

/// Connection lifecycle a server works through before it can carry traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    Unresolved,
    Resolving,
    Connecting(usize),
    Authenticating,
    Ready,
    Closed,
}

/// What a dispatched request's response channel eventually resolves to: a
/// real response, one of the two implicit-response shapes the purge rule
/// synthesizes for a skipped quiet opcode, or a terminal failure.
#[derive(Debug)]
pub enum DispatchOutcome {
    Response { packet: ResponsePacket, key: Vec<u8> },
    QuietMiss { key: Vec<u8> },
    QuietSuccess { key: Vec<u8> },
    Failed { key: Vec<u8>, error: Error },
}

struct LoggedRequest {
    opaque: u32,
    op_code: OpCode,
    key: Vec<u8>,
    reply: oneshot::Sender<DispatchOutcome>,
}

impl LoggedEntry for LoggedRequest {
    fn opaque(&self) -> u32 {
        self.opaque
    }

    fn op_code(&self) -> OpCode {
        self.op_code
    }
}

struct Connected {
    write_half: Mutex<WriteHalf<TcpStream>>,
    shutdown: CancellationToken,
}

/// One persistent, multiplexed connection to a single backend node: the
/// dispatch side of the wire protocol. [`Server::dispatch`] assigns the
/// opaque itself, so this type owns the whole outbound ordering story: the
/// connection lifecycle, the outstanding-request log, and the
/// implicit-response purge rule.
pub struct Server {
    pub address: Address,
    authenticator: PasswordAuthenticator,
    log_ctx: LogContext,
    state: Mutex<ServerState>,
    candidates: Mutex<CandidateList>,
    connected: Mutex<Option<Connected>>,
    cmd_log: Mutex<CommandLog<LoggedRequest>>,
    pending: Mutex<Buffer>,
    tap_sink: Mutex<Option<mpsc::UnboundedSender<ResponsePacket>>>,
    /// Serializes opaque assignment, the matching `cmd_log` push, and the
    /// ready-state write-or-buffer decision into one critical section per
    /// server, so two requests racing `dispatch()` (or a `dispatch()` racing
    /// the ready-flip in `try_connect_one`) can never be logged or flushed
    /// out of opaque order.
    dispatch_gate: Mutex<()>,
    opaque_seq: Arc<AtomicU32>,
}

impl Server {
    pub fn new(
        address: Address,
        authenticator: PasswordAuthenticator,
        log_ctx: LogContext,
        opaque_seq: Arc<AtomicU32>,
    ) -> Arc<Self> {
        let log_ctx = log_ctx.for_server(address.to_string());
        Arc::new(Self {
            address,
            authenticator,
            log_ctx,
            state: Mutex::new(ServerState::Unresolved),
            candidates: Mutex::new(CandidateList::new(Vec::new())),
            connected: Mutex::new(None),
            cmd_log: Mutex::new(CommandLog::new()),
            pending: Mutex::new(Buffer::new()),
            tap_sink: Mutex::new(None),
            dispatch_gate: Mutex::new(()),
            opaque_seq,
        })
    }

    fn next_opaque(&self) -> u32 {
        self.opaque_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn state(&self) -> ServerState {
        self.state.lock().await.clone()
    }

    pub async fn cmd_log_len(&self) -> usize {
        self.cmd_log.lock().await.len()
    }

    pub async fn has_pending(&self) -> bool {
        !self.pending.lock().await.is_empty()
    }

    /// Resolves the hostname, connects to the first reachable candidate,
    /// authenticates, and starts the background read loop. A failed connect
    /// attempt advances to the next candidate instead of giving up; only
    /// once every candidate is exhausted does the server move to `CLOSED`.
    pub async fn connect(self: &Arc<Self>, connect_timeout: Duration) -> Result<()> {
        *self.state.lock().await = ServerState::Resolving;

        let resolved = resolve(&self.address).await?;
        if resolved.is_empty() {
            *self.state.lock().await = ServerState::Closed;
            return Err(connection_failed("dns resolution returned no candidates"));
        }
        *self.candidates.lock().await = CandidateList::new(resolved);

        let mut last_err = None;
        loop {
            let (idx, addr) = {
                let candidates = self.candidates.lock().await;
                match candidates.current() {
                    Some(addr) => (candidates.cursor(), addr),
                    None => break,
                }
            };
            *self.state.lock().await = ServerState::Connecting(idx);

            match self.try_connect_one(addr, connect_timeout).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("{} failed to connect to {addr}: {e}", self.log_ctx);
                    last_err = Some(e);
                    let mut candidates = self.candidates.lock().await;
                    if !candidates.advance() {
                        break;
                    }
                }
            }
        }

        *self.state.lock().await = ServerState::Closed;
        Err(last_err.unwrap_or_else(|| connection_failed("no candidate addresses available")))
    }

    async fn try_connect_one(self: &Arc<Self>, addr: SocketAddr, connect_timeout: Duration) -> Result<()> {
        let opts = ConnectOptions {
            deadline: Instant::now() + connect_timeout,
            tcp_keep_alive_time: Duration::from_secs(60),
        };
        let stream = Connection::connect(addr, opts).await?.into_stream();

        *self.state.lock().await = ServerState::Authenticating;
        let stream = self.authenticate(stream).await?;

        let (read_half, write_half) = tokio::io::split(stream);
        let shutdown = CancellationToken::new();
        *self.connected.lock().await = Some(Connected {
            write_half: Mutex::new(write_half),
            shutdown: shutdown.clone(),
        });

        self.spawn_read_loop(read_half, shutdown);

        {
            let _gate = self.dispatch_gate.lock().await;
            *self.state.lock().await = ServerState::Ready;
            self.flush_pending().await?;
        }
        Ok(())
    }

    /// Negotiates a mechanism via `SaslListMechs`, then drives PLAIN or the
    /// matching SCRAM variant to completion. Runs over the raw stream,
    /// before the long-lived `FramedRead` read loop exists, since there is
    /// at most one request in flight at a time during this phase.
    async fn authenticate(&self, mut stream: TcpStream) -> Result<TcpStream> {
        let mut codec = KeyValueCodec::default();
        let mut buf = BytesMut::new();

        let list_req = RequestPacket::new(OpCode::SaslListMechs, 0).opaque(0);
        let list_resp = self.sasl_roundtrip(&mut stream, &mut buf, &mut codec, list_req).await?;
        let offered = list_resp
            .value
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .unwrap_or_default();

        let mechanism = Mechanism::select_best(&offered)
            .ok_or_else(|| sasl_failed("server offered no supported sasl mechanism"))?;

        match mechanism {
            Mechanism::Plain => {
                let payload = plain::build_request(&self.authenticator.username, &self.authenticator.password);
                let req = RequestPacket::new(OpCode::SaslAuth, 0)
                    .opaque(0)
                    .key(mechanism.name().as_bytes())
                    .value(&payload);
                let resp = self.sasl_roundtrip(&mut stream, &mut buf, &mut codec, req).await?;
                if !resp.status.is_success() {
                    return Err(self.sasl_status_error(&resp));
                }
            }
            Mechanism::ScramSha1 => {
                self.scram_handshake::<Hmac<Sha1>, Sha1>(&mut stream, &mut buf, &mut codec, mechanism)
                    .await?
            }
            Mechanism::ScramSha256 => {
                self.scram_handshake::<Hmac<Sha256>, Sha256>(&mut stream, &mut buf, &mut codec, mechanism)
                    .await?
            }
            Mechanism::ScramSha512 => {
                self.scram_handshake::<Hmac<Sha512>, Sha512>(&mut stream, &mut buf, &mut codec, mechanism)
                    .await?
            }
        }

        Ok(stream)
    }

    async fn scram_handshake<D, H>(
        &self,
        stream: &mut TcpStream,
        buf: &mut BytesMut,
        codec: &mut KeyValueCodec,
        mechanism: Mechanism,
    ) -> Result<()>
    where
        D: Mac + KeyInit,
        H: Digest,
    {
        let mut client = scram::Client::<D, H>::new(
            self.authenticator.username.clone(),
            self.authenticator.password.clone(),
        );

        let first = client.step1().map_err(MemdxError::from)?;
        let req = RequestPacket::new(OpCode::SaslAuth, 0)
            .opaque(0)
            .key(mechanism.name().as_bytes())
            .value(&first);
        let resp = self.sasl_roundtrip(stream, buf, codec, req).await?;
        if resp.status != Status::AuthContinue {
            return Err(self.sasl_status_error(&resp));
        }

        let second = client
            .step2(&resp.value.unwrap_or_default())
            .map_err(MemdxError::from)?;
        let req = RequestPacket::new(OpCode::SaslStep, 0)
            .opaque(0)
            .key(mechanism.name().as_bytes())
            .value(&second);
        let resp = self.sasl_roundtrip(stream, buf, codec, req).await?;
        if !resp.status.is_success() {
            return Err(self.sasl_status_error(&resp));
        }

        client
            .step3(&resp.value.unwrap_or_default())
            .map_err(MemdxError::from)?;
        Ok(())
    }

    fn sasl_status_error(&self, resp: &ResponsePacket) -> Error {
        Error::from(MemdxError::from_server(ServerError::new(
            resp.status,
            resp.op_code,
            resp.opaque,
        )))
    }

    async fn sasl_roundtrip(
        &self,
        stream: &mut TcpStream,
        buf: &mut BytesMut,
        codec: &mut KeyValueCodec,
        req: RequestPacket<'_>,
    ) -> Result<ResponsePacket> {
        let mut out = BytesMut::new();
        codec.encode(req, &mut out).map_err(Error::from)?;
        stream
            .write_all(&out)
            .await
            .map_err(|e| Error::from(MemdxError::from(e)))?;
        read_one(stream, buf, codec).await
    }

    /// Assigns the next opaque for this server, encodes the request, and
    /// enqueues it: before the connection is `READY` the encoded bytes
    /// accumulate in `pending` instead of hitting the wire, but the command
    /// log entry is pushed either way so the purge rule accounts for it once
    /// responses start arriving. Opaque assignment, the `cmd_log` push, and
    /// the ready-state write-or-buffer decision all happen under
    /// `dispatch_gate`, so two requests dispatched concurrently to the same
    /// server are always logged -- and land on the wire or in `pending` --
    /// in the same order their opaques were handed out.
    pub async fn dispatch(
        self: &Arc<Self>,
        mut req: RequestPacket<'_>,
        key: Vec<u8>,
    ) -> Result<oneshot::Receiver<DispatchOutcome>> {
        let _gate = self.dispatch_gate.lock().await;

        let opaque = self.next_opaque();
        req = req.opaque(opaque);
        let op_code = req.op_code();

        let mut codec = KeyValueCodec::default();
        let mut bytes = BytesMut::new();
        codec.encode(req, &mut bytes).map_err(Error::from)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut log = self.cmd_log.lock().await;
            log.push(LoggedRequest {
                opaque,
                op_code,
                key,
                reply: tx,
            });
        }

        let ready = matches!(*self.state.lock().await, ServerState::Ready);
        if ready {
            self.write_frame(&bytes).await?;
        } else {
            self.pending.lock().await.append(&bytes);
        }

        Ok(rx)
    }

    /// Registers a channel for the unsolicited TAP mutation stream pushed
    /// by this server once a `TapConnect` dispatch has been acknowledged.
    /// These packets never carry an opaque that matches anything in
    /// `cmd_log`, so they bypass the purge rule entirely.
    pub async fn open_tap_stream(&self) -> mpsc::UnboundedReceiver<ResponsePacket> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tap_sink.lock().await = Some(tx);
        rx
    }

    async fn write_frame(&self, bytes: &[u8]) -> Result<()> {
        let guard = self.connected.lock().await;
        let connected = guard.as_ref().ok_or_else(|| connection_failed("not connected"))?;
        let mut writer = connected.write_half.lock().await;
        writer
            .write_all(bytes)
            .await
            .map_err(|e| Error::from(MemdxError::from(e)))
    }

    async fn flush_pending(&self) -> Result<()> {
        let bytes = self.pending.lock().await.take();
        if bytes.is_empty() {
            return Ok(());
        }
        self.write_frame(&bytes).await
    }

    fn spawn_read_loop(self: &Arc<Self>, read_half: ReadHalf<TcpStream>, shutdown: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut framed = FramedRead::new(read_half, KeyValueCodec::default());
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = framed.next() => match next {
                        Some(Ok(packet)) => this.handle_response(packet).await,
                        Some(Err(e)) => {
                            warn!("{} read loop error: {e}", this.log_ctx);
                            this.fail_outstanding(Error::from(e)).await;
                            break;
                        }
                        None => {
                            this.fail_outstanding(connection_failed("connection closed by peer")).await;
                            break;
                        }
                    },
                }
            }
            *this.state.lock().await = ServerState::Closed;
            *this.connected.lock().await = None;
        });
    }

    /// Applies the implicit-response purge rule: every quiet opcode skipped
    /// over by this response's opaque gets a synthesized callback, then the
    /// entry actually addressed by the response (if still logged) gets the
    /// real one. A non-quiet opcode found in the gap is a protocol
    /// violation and tears the connection down.
    async fn handle_response(&self, packet: ResponsePacket) {
        if packet.op_code.is_tap_event() {
            let sink = self.tap_sink.lock().await;
            if let Some(sink) = sink.as_ref() {
                let _ = sink.send(packet);
            } else {
                trace!("{} dropped tap event with no open stream", self.log_ctx);
            }
            return;
        }

        let mut log = self.cmd_log.lock().await;
        let result = log.purge_to(packet.opaque);
        drop(log);

        match result {
            Ok(result) => {
                for synthesized in result.synthesized {
                    deliver_synthesized(synthesized);
                }
                match result.matched {
                    Some(matched) => {
                        let key = matched.key.clone();
                        let _ = matched.reply.send(DispatchOutcome::Response { packet, key });
                    }
                    None => trace!(
                        "{} unmatched response for opaque {}",
                        self.log_ctx,
                        packet.opaque
                    ),
                }
            }
            Err(e) => {
                warn!("{} {e}", self.log_ctx);
                self.fail_outstanding(Error::from(e)).await;
            }
        }
    }

    async fn fail_outstanding(&self, error: Error) {
        let mut log = self.cmd_log.lock().await;
        let entries = log.drain_all();
        drop(log);
        for entry in entries {
            let key = entry.key.clone();
            let _ = entry.reply.send(DispatchOutcome::Failed { key, error: error.clone() });
        }
    }

    /// Tears the connection down and synthesizes a cancellation for every
    /// request still outstanding, quiet or not (`S6`: destroy purges
    /// unconditionally rather than applying the quiet-opcode purge rule).
    pub async fn destroy(&self) {
        if let Some(connected) = self.connected.lock().await.take() {
            connected.shutdown.cancel();
        }
        *self.state.lock().await = ServerState::Closed;
        self.tap_sink.lock().await.take();
        self.fail_outstanding(Error::from(MemdxError::new_cancelled_error())).await;
    }
}

fn deliver_synthesized(entry: LoggedRequest) {
    let outcome = if entry.op_code.is_get_family() {
        DispatchOutcome::QuietMiss { key: entry.key }
    } else {
        DispatchOutcome::QuietSuccess { key: entry.key }
    };
    let _ = entry.reply.send(outcome);
}

async fn read_one(stream: &mut TcpStream, buf: &mut BytesMut, codec: &mut KeyValueCodec) -> Result<ResponsePacket> {
    loop {
        if let Some(packet) = codec.decode(buf).map_err(Error::from)? {
            return Ok(packet);
        }

        let mut chunk = [0u8; 4096];
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::from(MemdxError::from(e)))?;
        if n == 0 {
            return Err(connection_failed("connection closed during handshake"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn resolve(address: &Address) -> Result<Vec<SocketAddr>> {
    let hosts = lookup_host((address.host.as_str(), address.port))
        .await
        .map_err(|e| connection_failed_with_source("dns resolution failed", e))?;
    Ok(hosts.collect())
}

fn connection_failed(msg: &str) -> Error {
    Error::from(MemdxError::new_connection_failed_error(
        msg,
        Box::new(io::Error::new(io::ErrorKind::NotConnected, msg.to_string())),
    ))
}

fn connection_failed_with_source(msg: &str, source: io::Error) -> Error {
    Error::from(MemdxError::new_connection_failed_error(msg, Box::new(source)))
}

fn sasl_failed(msg: &str) -> Error {
    Error::from(MemdxError::new_sasl_error(msg))
}
