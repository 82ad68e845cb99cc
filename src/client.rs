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

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::address::Address;
use crate::authenticator::PasswordAuthenticator;
use crate::config::fetch::{stream_bucket_config, FetchOptions};
use crate::error::{Error, Result};
use crate::log::LogContext;
use crate::memdx::error::{Error as MemdxError, ServerError};
use crate::memdx::opcode::OpCode;
use crate::memdx::packet::{RequestPacket, ResponsePacket};
use crate::memdx::status::Status;
use crate::server::{DispatchOutcome, Server};
use crate::storage_op::StorageOpType;
use crate::vbucketrouter::{RoutingInfo, VbucketRouter};

/// Connection options grouped into a single struct, mirroring the
/// `AgentOptions`/`KvClientOptions` pattern rather than a pile of
/// positional arguments to `create`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub bootstrap_host: String,
    pub bootstrap_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub bucket: String,
    pub connect_timeout: Duration,
    pub reconnect_backoff: Duration,
}

impl ClientOptions {
    pub fn new(
        bootstrap_host: impl Into<String>,
        bootstrap_port: u16,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            bootstrap_host: bootstrap_host.into(),
            bootstrap_port,
            username: None,
            password: None,
            bucket: bucket.into(),
            connect_timeout: Duration::from_secs(10),
            reconnect_backoff: Duration::from_millis(500),
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// What a successful GET yields, apart from the key (passed to the
/// callback alongside this, per the source's `get(cookie, error, key,
/// nkey, bytes, nbytes, flags, cas)` surface).
#[derive(Debug, Clone, Default)]
pub struct GetPayload {
    pub value: Vec<u8>,
    pub flags: u32,
    pub cas: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ArithmeticPayload {
    pub value: u64,
    pub cas: u64,
}

#[derive(Debug, Clone)]
pub struct TapMutation {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub flags: u32,
    pub expiration: u32,
    pub cas: u64,
    pub vbucket: u16,
}

pub type GetCallback = Arc<dyn Fn(&Arc<Client>, &[u8], Result<GetPayload>) + Send + Sync>;
pub type StoreCallback = Arc<dyn Fn(&Arc<Client>, &[u8], Result<u64>) + Send + Sync>;
pub type ArithmeticCallback = Arc<dyn Fn(&Arc<Client>, &[u8], Result<ArithmeticPayload>) + Send + Sync>;
pub type RemoveCallback = Arc<dyn Fn(&Arc<Client>, &[u8], Result<()>) + Send + Sync>;
pub type TapCallback = Arc<dyn Fn(&Arc<Client>, TapMutation) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&Arc<Client>, &Error) + Send + Sync>;

/// The installed callback table (§6 "Callback surface"). Any entry left
/// unset means events of that kind are silently discarded, matching the
/// source's behaviour of only calling a handler that was actually
/// registered.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub get: Option<GetCallback>,
    pub store: Option<StoreCallback>,
    pub arithmetic: Option<ArithmeticCallback>,
    pub remove: Option<RemoveCallback>,
    pub tap: Option<TapCallback>,
    pub error: Option<ErrorCallback>,
}

/// A predicate applied to outgoing requests before they are dispatched.
/// Returning `false` drops the packet silently -- the corresponding
/// callback never fires. Preserved from the source because client code
/// depends on it, but user-hostile: prefer not setting one.
pub type PacketFilter = Arc<dyn Fn(&RequestPacket) -> bool + Send + Sync>;

#[derive(Copy, Clone)]
enum OpKind {
    Get,
    Store,
    Arithmetic,
    Remove,
}

/// A dispatched request's outcome, still in flight. Queued onto its
/// server's outcome pump rather than awaited by an independently scheduled
/// task, so that two requests sent to the same server in order always have
/// their callbacks fire in that order too (the spec's per-server ordering
/// guarantee): awaiting each oneshot serially inside one task preserves
/// order even when the underlying runtime wakes unrelated tasks out of
/// sequence.
type PendingOutcome = (OpKind, oneshot::Receiver<DispatchOutcome>);

/// The core's Client Instance: owns the server array, the vbucket routing
/// table, the callback table, and the monotonic opaque sequence. Created
/// unconnected; `connect()` performs the bootstrap config fetch and brings
/// up the per-node connections.
pub struct Client {
    options: ClientOptions,
    log_ctx: LogContext,
    authenticator: PasswordAuthenticator,
    router: VbucketRouter,
    servers: RwLock<Vec<Arc<Server>>>,
    server_index: RwLock<HashMap<String, usize>>,
    outcome_txs: RwLock<Vec<mpsc::UnboundedSender<PendingOutcome>>>,
    /// Shared with every `Server` so opaques stay globally monotonic even
    /// though each server assigns its own under its own `dispatch_gate`.
    opaque_seq: Arc<AtomicU32>,
    in_flight: AtomicI64,
    drained: Notify,
    destroyed: AtomicBool,
    /// Nudges the config-stream task in `connect()` to abandon its current
    /// streaming fetch and reissue it immediately, bypassing
    /// `reconnect_backoff`. Set on a `NOT_MY_VBUCKET` response.
    refetch_now: Notify,
    config_ready: watch::Sender<bool>,
    callbacks: RwLock<Callbacks>,
    cookie: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    packet_filter: RwLock<Option<PacketFilter>>,
    http_client: reqwest::Client,
    config_stream_task: Mutex<Option<JoinHandle<()>>>,
    config_installer_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// `create(host, user, pass, bucket, loop)` -- allocates the client and
    /// records its credentials. No I/O happens until `connect()`; the event
    /// loop the spec threads through this constructor is, in this crate,
    /// simply "the ambient Tokio runtime the caller is running in".
    pub fn create(options: ClientOptions) -> Arc<Self> {
        let authenticator = PasswordAuthenticator::new(
            options.username.clone().unwrap_or_default(),
            options.password.clone().unwrap_or_default(),
        );
        let (config_ready, _) = watch::channel(false);

        Arc::new(Self {
            options,
            log_ctx: LogContext {
                client_id: LogContext::new_client_id(),
                server: None,
            },
            authenticator,
            router: VbucketRouter::new(),
            servers: RwLock::new(Vec::new()),
            server_index: RwLock::new(HashMap::new()),
            outcome_txs: RwLock::new(Vec::new()),
            opaque_seq: Arc::new(AtomicU32::new(0)),
            in_flight: AtomicI64::new(0),
            drained: Notify::new(),
            destroyed: AtomicBool::new(false),
            refetch_now: Notify::new(),
            config_ready,
            callbacks: RwLock::new(Callbacks::default()),
            cookie: Mutex::new(None),
            packet_filter: RwLock::new(None),
            http_client: reqwest::Client::new(),
            config_stream_task: Mutex::new(None),
            config_installer_task: Mutex::new(None),
        })
    }

    /// Fetches the initial vbucket configuration from the bootstrap host,
    /// instantiates a `Server` per node in the resulting server list, and
    /// begins connecting each. A background task keeps consuming the
    /// streaming config endpoint afterwards so topology changes (and
    /// `NOT_MY_VBUCKET`-triggered refetches) install new routing atomically;
    /// a second task drains the parsed documents into `install_config` so
    /// the synchronous fetch callback never blocks on server-array locks.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let fetch_opts = FetchOptions {
            host: self.options.bootstrap_host.clone(),
            port: self.options.bootstrap_port,
            bucket: self.options.bucket.clone(),
            username: self.options.username.clone(),
            password: self.options.password.clone(),
        };

        let (config_tx, mut config_rx) = mpsc::unbounded_channel::<RoutingInfo>();

        let this = Arc::clone(self);
        let stream_opts = fetch_opts;
        let stream_task = tokio::spawn(async move {
            loop {
                let tx = config_tx.clone();
                let fetch = stream_bucket_config(&this.http_client, &stream_opts, move |info| {
                    let _ = tx.send(info);
                });

                tokio::select! {
                    result = fetch => {
                        if let Err(e) = result {
                            warn!("{} config stream ended: {e}", this.log_ctx);
                            this.notify_error(&e).await;
                        }
                        tokio::time::sleep(this.options.reconnect_backoff).await;
                    }
                    _ = this.refetch_now.notified() => {
                        debug!("{} forcing bucket config refetch after NOT_MY_VBUCKET", this.log_ctx);
                    }
                }
            }
        });
        *self.config_stream_task.lock().await = Some(stream_task);

        let this = Arc::clone(self);
        let installer_task = tokio::spawn(async move {
            while let Some(info) = config_rx.recv().await {
                this.install_config(info).await;
            }
        });
        *self.config_installer_task.lock().await = Some(installer_task);

        let mut ready = self.config_ready.subscribe();
        if !*ready.borrow() {
            tokio::time::timeout(self.options.connect_timeout, async {
                while !*ready.borrow() {
                    if ready.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|_| Error::new_config_error("timed out waiting for initial bucket configuration"))?;
        }

        Ok(())
    }

    /// Installs newly fetched routing info, creating any `Server` records
    /// this client doesn't already have and kicking off their connections.
    /// Installation itself is atomic (a single `ArcSwap` store inside
    /// `VbucketRouter`), so no in-flight handler ever observes a
    /// half-updated configuration.
    async fn install_config(self: &Arc<Self>, info: RoutingInfo) {
        let mut new_servers = Vec::new();
        {
            let mut servers = self.servers.write().await;
            let mut index = self.server_index.write().await;
            let mut outcome_txs = self.outcome_txs.write().await;
            for addr in &info.servers {
                if index.contains_key(addr) {
                    continue;
                }
                let address = match Address::parse(addr) {
                    Ok(a) => a,
                    Err(e) => {
                        error!("{} skipping unparsable server address {addr}: {e}", self.log_ctx);
                        continue;
                    }
                };
                let server = Server::new(
                    address,
                    self.authenticator.clone(),
                    self.log_ctx.clone(),
                    Arc::clone(&self.opaque_seq),
                );
                index.insert(addr.clone(), servers.len());
                servers.push(Arc::clone(&server));

                let (tx, rx_queue) = mpsc::unbounded_channel::<PendingOutcome>();
                outcome_txs.push(tx);
                tokio::spawn(Arc::clone(self).run_outcome_pump(rx_queue));

                new_servers.push(server);
            }
        }

        self.router.update(info);
        let _ = self.config_ready.send(true);

        for server in new_servers {
            let this = Arc::clone(self);
            let connect_timeout = self.options.connect_timeout;
            tokio::spawn(async move {
                if let Err(e) = server.connect(connect_timeout).await {
                    warn!("{} server connect failed: {e}", this.log_ctx);
                    this.notify_error(&e).await;
                }
            });
        }
    }

    pub async fn set_cookie(&self, cookie: Arc<dyn Any + Send + Sync>) {
        *self.cookie.lock().await = Some(cookie);
    }

    pub async fn get_cookie(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.cookie.lock().await.clone()
    }

    pub async fn set_callbacks(&self, callbacks: Callbacks) {
        *self.callbacks.write().await = callbacks;
    }

    pub async fn set_packet_filter(&self, filter: PacketFilter) {
        *self.packet_filter.write().await = Some(filter);
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::new_shutdown());
        }
        Ok(())
    }

    async fn server_by_index(&self, idx: usize) -> Result<Arc<Server>> {
        self.servers
            .read()
            .await
            .get(idx)
            .cloned()
            .ok_or_else(|| Error::new_no_server_assigned(idx as u16))
    }

    /// `mget(["a", "b", "c"])` -- all but the last key in each per-server
    /// batch use `GETQ`; the last uses `GETK` so the server is guaranteed
    /// to send a terminating response even when the final key is a hit.
    pub async fn mget(self: &Arc<Self>, keys: Vec<Vec<u8>>) -> Result<()> {
        self.mget_inner(keys.into_iter().map(|k| (k, None)).collect()).await
    }

    /// Like `mget`, but every key is routed as though it were `hashkey`,
    /// guaranteeing the whole batch lands on one server.
    pub async fn mget_by_key(self: &Arc<Self>, keys: Vec<Vec<u8>>, hashkey: Vec<u8>) -> Result<()> {
        let entries = keys.into_iter().map(|k| (k, Some(hashkey.clone()))).collect();
        self.mget_inner(entries).await
    }

    async fn mget_inner(self: &Arc<Self>, entries: Vec<(Vec<u8>, Option<Vec<u8>>)>) -> Result<()> {
        self.ensure_alive()?;
        let mut group_of: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<(usize, Vec<(u16, Vec<u8>)>)> = Vec::new();

        for (key, hashkey) in entries {
            let (vb_id, server_idx) = self.router.resolve(&key, hashkey.as_deref())?;
            let group_idx = *group_of.entry(server_idx).or_insert_with(|| {
                groups.push((server_idx, Vec::new()));
                groups.len() - 1
            });
            groups[group_idx].1.push((vb_id, key));
        }

        for (server_idx, items) in groups {
            let server = self.server_by_index(server_idx).await?;
            let last = items.len().saturating_sub(1);
            for (i, (vb_id, key)) in items.into_iter().enumerate() {
                let op_code = if i == last { OpCode::GetK } else { OpCode::GetQ };
                let key_bytes = key.clone();
                let req = RequestPacket::new(op_code, 0)
                    .vbucket_id(vb_id)
                    .key(&key_bytes);
                self.dispatch(server_idx, Arc::clone(&server), req, key, OpKind::Get).await?;
            }
        }
        Ok(())
    }

    /// `store(SET, "k", "v", cas=0)` -- enqueues one STORE-family request.
    pub async fn store(
        self: &Arc<Self>,
        op: StorageOpType,
        key: Vec<u8>,
        value: Vec<u8>,
        flags: u32,
        expiration: u32,
        cas: u64,
    ) -> Result<()> {
        self.store_by_key_inner(op, key, None, value, flags, expiration, cas).await
    }

    pub async fn store_by_key(
        self: &Arc<Self>,
        op: StorageOpType,
        key: Vec<u8>,
        hashkey: Vec<u8>,
        value: Vec<u8>,
        flags: u32,
        expiration: u32,
        cas: u64,
    ) -> Result<()> {
        self.store_by_key_inner(op, key, Some(hashkey), value, flags, expiration, cas)
            .await
    }

    async fn store_by_key_inner(
        self: &Arc<Self>,
        op: StorageOpType,
        key: Vec<u8>,
        hashkey: Option<Vec<u8>>,
        value: Vec<u8>,
        flags: u32,
        expiration: u32,
        cas: u64,
    ) -> Result<()> {
        self.ensure_alive()?;
        let (vb_id, server_idx) = self.router.resolve(&key, hashkey.as_deref())?;
        let server = self.server_by_index(server_idx).await?;

        let mut extras = Vec::new();
        if op.takes_flags_and_expiration() {
            extras.extend_from_slice(&flags.to_be_bytes());
            extras.extend_from_slice(&expiration.to_be_bytes());
        }

        let key_bytes = key.clone();
        let mut req = RequestPacket::new(op.op_code(), 0)
            .vbucket_id(vb_id)
            .key(&key_bytes)
            .value(&value);
        if !extras.is_empty() {
            req = req.extras(&extras);
        }
        if cas != 0 {
            req = req.cas(cas);
        }

        self.dispatch(server_idx, server, req, key, OpKind::Store).await
    }

    /// `arithmetic("ctr", delta=+5, create=true, initial=10)`. When
    /// `create` is false, the extras' expiration field is pinned to
    /// `0xffffffff`, the binary protocol's "fail rather than create"
    /// sentinel, regardless of the `expiration` argument.
    pub async fn arithmetic(
        self: &Arc<Self>,
        key: Vec<u8>,
        delta: i64,
        initial: u64,
        expiration: u32,
        create: bool,
    ) -> Result<()> {
        self.arithmetic_by_key_inner(key, None, delta, initial, expiration, create).await
    }

    pub async fn arithmetic_by_key(
        self: &Arc<Self>,
        key: Vec<u8>,
        hashkey: Vec<u8>,
        delta: i64,
        initial: u64,
        expiration: u32,
        create: bool,
    ) -> Result<()> {
        self.arithmetic_by_key_inner(key, Some(hashkey), delta, initial, expiration, create)
            .await
    }

    async fn arithmetic_by_key_inner(
        self: &Arc<Self>,
        key: Vec<u8>,
        hashkey: Option<Vec<u8>>,
        delta: i64,
        initial: u64,
        expiration: u32,
        create: bool,
    ) -> Result<()> {
        self.ensure_alive()?;
        let (vb_id, server_idx) = self.router.resolve(&key, hashkey.as_deref())?;
        let server = self.server_by_index(server_idx).await?;

        let op_code = if delta >= 0 { OpCode::Increment } else { OpCode::Decrement };
        let magnitude = delta.unsigned_abs();

        let mut extras = Vec::with_capacity(20);
        extras.extend_from_slice(&magnitude.to_be_bytes());
        extras.extend_from_slice(&initial.to_be_bytes());
        extras.extend_from_slice(&if create { expiration } else { 0xffff_ffff }.to_be_bytes());

        let key_bytes = key.clone();
        let req = RequestPacket::new(op_code, 0)
            .vbucket_id(vb_id)
            .key(&key_bytes)
            .extras(&extras);

        self.dispatch(server_idx, server, req, key, OpKind::Arithmetic).await
    }

    pub async fn remove(self: &Arc<Self>, key: Vec<u8>, cas: u64) -> Result<()> {
        self.remove_by_key_inner(key, None, cas).await
    }

    pub async fn remove_by_key(self: &Arc<Self>, key: Vec<u8>, hashkey: Vec<u8>, cas: u64) -> Result<()> {
        self.remove_by_key_inner(key, Some(hashkey), cas).await
    }

    async fn remove_by_key_inner(self: &Arc<Self>, key: Vec<u8>, hashkey: Option<Vec<u8>>, cas: u64) -> Result<()> {
        self.ensure_alive()?;
        let (vb_id, server_idx) = self.router.resolve(&key, hashkey.as_deref())?;
        let server = self.server_by_index(server_idx).await?;

        let key_bytes = key.clone();
        let mut req = RequestPacket::new(OpCode::Delete, 0)
            .vbucket_id(vb_id)
            .key(&key_bytes);
        if cas != 0 {
            req = req.cas(cas);
        }

        self.dispatch(server_idx, server, req, key, OpKind::Remove).await
    }

    /// Opens a TAP stream against every known server, optionally blocking
    /// until every stream's mutation channel closes (`block: true`). The
    /// filter blob is passed through verbatim as the `TapConnect` value.
    ///
    /// A server never answers `TapConnect` with a plain response: it
    /// acknowledges by streaming `TAP_MUTATION`/`TAP_DELETE` packets
    /// carrying the connect's opaque, routed via `tap_sink` rather than
    /// `cmd_log`. So the sink is opened *before* the request is dispatched
    /// (otherwise the first mutations race `open_tap_stream()` and get
    /// dropped), and `tap_cluster` never blocks waiting for a synthetic
    /// connect ack -- only a genuine error response resolves `cmd_log`'s
    /// oneshot for this opaque, and that's watched in the background.
    pub async fn tap_cluster(self: &Arc<Self>, filter: Vec<u8>, block: bool) -> Result<()> {
        self.ensure_alive()?;
        let servers: Vec<Arc<Server>> = self.servers.read().await.clone();
        let mut joins = Vec::new();

        for server in servers {
            let mutations = server.open_tap_stream().await;

            let extras = 0u32.to_be_bytes();
            let req = RequestPacket::new(OpCode::TapConnect, 0).extras(&extras).value(&filter);
            let rx = server.dispatch(req, Vec::new()).await?;

            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Ok(DispatchOutcome::Response { packet, .. }) = rx.await {
                    if !packet.status.is_success() {
                        this.notify_error(&server_error(&packet)).await;
                    }
                }
            });

            let this = Arc::clone(self);
            let mut mutations = mutations;
            let handle = tokio::spawn(async move {
                while let Some(packet) = mutations.recv().await {
                    this.deliver_tap(packet).await;
                }
            });
            joins.push(handle);
        }

        if block {
            for handle in joins {
                let _ = handle.await;
            }
        }
        Ok(())
    }

    async fn deliver_tap(self: &Arc<Self>, packet: ResponsePacket) {
        let flags = be_u32(packet.extras.as_deref(), 0);
        let expiration = be_u32(packet.extras.as_deref(), 4);

        let mutation = TapMutation {
            key: packet.key.clone().unwrap_or_default(),
            value: packet.value.clone().unwrap_or_default(),
            flags,
            expiration,
            cas: packet.cas.unwrap_or_default(),
            vbucket: packet.vbucket_id.unwrap_or_default(),
        };

        let callbacks = self.callbacks.read().await;
        if let Some(cb) = &callbacks.tap {
            cb(self, mutation);
        }
    }

    /// Applies the packet filter (if any), assigns the request to the
    /// server's outbound path, and hands its eventual outcome to that
    /// server's outcome pump so callbacks fire in dispatch order. Filtered
    /// packets are dropped without incrementing the in-flight count, so
    /// `execute()` never waits on a request that was never really sent.
    async fn dispatch(
        self: &Arc<Self>,
        server_idx: usize,
        server: Arc<Server>,
        req: RequestPacket<'_>,
        key: Vec<u8>,
        kind: OpKind,
    ) -> Result<()> {
        {
            let filter = self.packet_filter.read().await;
            if let Some(f) = filter.as_ref() {
                if !f(&req) {
                    debug!("{} packet filter dropped a {:?} request", self.log_ctx, req.op_code());
                    return Ok(());
                }
            }
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let rx = match server.dispatch(req, key).await {
            Ok(rx) => rx,
            Err(e) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.drained.notify_waiters();
                return Err(e);
            }
        };

        let tx = self.outcome_txs.read().await.get(server_idx).cloned();
        let to_resolve_inline = match tx {
            Some(tx) => match tx.send((kind, rx)) {
                Ok(()) => None,
                Err(mpsc::error::SendError((kind, rx))) => Some((kind, rx)),
            },
            None => Some((kind, rx)),
        };

        if let Some((kind, rx)) = to_resolve_inline {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.resolve_one(kind, rx).await });
        }

        Ok(())
    }

    /// Awaits one outcome and invokes its callback. Called sequentially by
    /// `run_outcome_pump` for the common case; falls back to a one-off
    /// spawned task if a server's pump isn't reachable (e.g. a dispatch
    /// raced the server being dropped from the routing table).
    async fn resolve_one(
        self: &Arc<Self>,
        kind: OpKind,
        rx: oneshot::Receiver<DispatchOutcome>,
    ) {
        let outcome = rx.await.unwrap_or_else(|_| DispatchOutcome::Failed {
            key: Vec::new(),
            error: Error::from(MemdxError::new_cancelled_error()),
        });
        self.handle_outcome(kind, outcome).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.drained.notify_waiters();
    }

    /// One long-lived task per server, draining queued outcomes strictly in
    /// the order their requests were dispatched. Ends when the server's
    /// sender side is dropped, which only happens along with the client
    /// itself.
    async fn run_outcome_pump(
        self: Arc<Self>,
        mut queue_rx: mpsc::UnboundedReceiver<PendingOutcome>,
    ) {
        while let Some((kind, rx)) = queue_rx.recv().await {
            self.resolve_one(kind, rx).await;
        }
    }

    async fn handle_outcome(self: &Arc<Self>, kind: OpKind, outcome: DispatchOutcome) {
        match kind {
            OpKind::Get => {
                let (key, result) = match outcome {
                    DispatchOutcome::Response { packet, key } => (key, get_payload(packet)),
                    DispatchOutcome::QuietMiss { key } => {
                        (key.clone(), Err(status_error(Status::KeyNotFound, OpCode::GetQ)))
                    }
                    DispatchOutcome::QuietSuccess { key } => (key.clone(), Ok(GetPayload::default())),
                    DispatchOutcome::Failed { key, error } => (key, Err(error)),
                };
                if let Err(e) = &result {
                    self.report_error(e).await;
                }
                let callbacks = self.callbacks.read().await;
                if let Some(cb) = &callbacks.get {
                    cb(self, &key, result);
                }
            }
            OpKind::Store => {
                let (key, result) = match outcome {
                    DispatchOutcome::Response { packet, key } => (key, cas_of(packet)),
                    DispatchOutcome::QuietMiss { key } | DispatchOutcome::QuietSuccess { key } => (key, Ok(0)),
                    DispatchOutcome::Failed { key, error } => (key, Err(error)),
                };
                if let Err(e) = &result {
                    self.report_error(e).await;
                }
                let callbacks = self.callbacks.read().await;
                if let Some(cb) = &callbacks.store {
                    cb(self, &key, result);
                }
            }
            OpKind::Arithmetic => {
                let (key, result) = match outcome {
                    DispatchOutcome::Response { packet, key } => (key, arithmetic_payload(packet)),
                    DispatchOutcome::QuietMiss { key } | DispatchOutcome::QuietSuccess { key } => {
                        (key, Ok(ArithmeticPayload::default()))
                    }
                    DispatchOutcome::Failed { key, error } => (key, Err(error)),
                };
                if let Err(e) = &result {
                    self.report_error(e).await;
                }
                let callbacks = self.callbacks.read().await;
                if let Some(cb) = &callbacks.arithmetic {
                    cb(self, &key, result);
                }
            }
            OpKind::Remove => {
                let (key, result) = match outcome {
                    DispatchOutcome::Response { packet, key } => (key, status_of(packet)),
                    DispatchOutcome::QuietMiss { key } | DispatchOutcome::QuietSuccess { key } => (key, Ok(())),
                    DispatchOutcome::Failed { key, error } => (key, Err(error)),
                };
                if let Err(e) = &result {
                    self.report_error(e).await;
                }
                let callbacks = self.callbacks.read().await;
                if let Some(cb) = &callbacks.remove {
                    cb(self, &key, result);
                }
            }
        }
    }

    async fn notify_error(self: &Arc<Self>, err: &Error) {
        let callbacks = self.callbacks.read().await;
        if let Some(cb) = &callbacks.error {
            cb(self, err);
        }
    }

    /// Surfaces an operation's terminal error to the error callback and, for
    /// `NOT_MY_VBUCKET` specifically, nudges the config-stream task to
    /// refetch the bucket map immediately rather than waiting on the next
    /// scheduled reconnect or the next document the streaming connection
    /// happens to push.
    async fn report_error(self: &Arc<Self>, err: &Error) {
        self.notify_error(err).await;
        if is_not_my_vbucket(err) {
            self.refetch_now.notify_one();
        }
    }

    /// Runs until the in-flight request set across all servers is empty:
    /// every `dispatch()` that hasn't yet synthesized or delivered its
    /// outcome counts toward this, whether or not the owning server is
    /// `READY` yet, so a request still sitting in `pending` keeps
    /// `execute()` from returning early. `in_flight` is the fast path; the
    /// actual invariant this waits for is every server's `cmd_log` empty and
    /// no pre-`READY` server holding unflushed `pending` bytes, which is
    /// what `all_servers_drained` checks directly before returning.
    pub async fn execute(&self) {
        loop {
            if self.in_flight.load(Ordering::SeqCst) <= 0 && self.all_servers_drained().await {
                return;
            }
            self.drained.notified().await;
        }
    }

    async fn all_servers_drained(&self) -> bool {
        let servers = self.servers.read().await;
        for server in servers.iter() {
            if server.cmd_log_len().await != 0 || server.has_pending().await {
                return false;
            }
        }
        true
    }

    /// Tears down every server (synthesizing a cancellation for each
    /// outstanding request via the purge rule applied unconditionally),
    /// then stops the background config-stream tasks. Callbacks must not
    /// call this from within themselves.
    pub async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.config_stream_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.config_installer_task.lock().await.take() {
            handle.abort();
        }
        let servers = self.servers.read().await;
        for server in servers.iter() {
            server.destroy().await;
        }
        info!("{} destroyed", self.log_ctx);
    }
}

fn be_u32(bytes: Option<&[u8]>, offset: usize) -> u32 {
    bytes
        .and_then(|b| b.get(offset..offset + 4))
        .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
        .unwrap_or_default()
}

fn get_payload(packet: ResponsePacket) -> Result<GetPayload> {
    if !packet.status.is_success() {
        return Err(server_error(&packet));
    }
    let flags = be_u32(packet.extras.as_deref(), 0);
    Ok(GetPayload {
        value: packet.value.unwrap_or_default(),
        flags,
        cas: packet.cas.unwrap_or_default(),
    })
}

fn cas_of(packet: ResponsePacket) -> Result<u64> {
    if !packet.status.is_success() {
        return Err(server_error(&packet));
    }
    Ok(packet.cas.unwrap_or_default())
}

fn arithmetic_payload(packet: ResponsePacket) -> Result<ArithmeticPayload> {
    if !packet.status.is_success() {
        return Err(server_error(&packet));
    }
    let value = packet
        .value
        .as_deref()
        .and_then(|v| v.get(0..8))
        .map(|b| u64::from_be_bytes(b.try_into().unwrap()))
        .unwrap_or_default();
    Ok(ArithmeticPayload { value, cas: packet.cas.unwrap_or_default() })
}

fn status_of(packet: ResponsePacket) -> Result<()> {
    if !packet.status.is_success() {
        return Err(server_error(&packet));
    }
    Ok(())
}

fn status_error(status: Status, op_code: OpCode) -> Error {
    Error::from(MemdxError::from_server(ServerError::new(status, op_code, 0)))
}

fn server_error(packet: &ResponsePacket) -> Error {
    Error::from(MemdxError::from_server(ServerError::new(
        packet.status,
        packet.op_code,
        packet.opaque,
    )))
}

fn is_not_my_vbucket(err: &Error) -> bool {
    err.is_memdx_error()
        .and_then(MemdxError::as_server_error)
        .map_or(false, |server_err| server_err.status == Status::NotMyVbucket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_options_default_timeouts_are_reasonable() {
        let opts = ClientOptions::new("localhost", 8091, "default");
        assert_eq!(opts.bootstrap_port, 8091);
        assert!(opts.connect_timeout > Duration::from_secs(0));
    }
}
