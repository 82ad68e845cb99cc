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

//! Client core for a vbucket-sharded, memcached-wire-compatible key-value
//! store: vbucket routing, a multiplexed per-node binary-protocol
//! connection with SASL negotiation, TAP streaming, and the bucket config
//! bootstrap that keeps routing current as the cluster's topology changes.

pub mod address;
pub mod authenticator;
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod log;
pub mod memdx;
pub mod multiplex;
pub mod sasl;
pub mod server;
pub mod storage_op;
pub mod vbucketmap;
pub mod vbucketrouter;

pub use client::{
    ArithmeticPayload, Callbacks, Client, ClientOptions, GetPayload, PacketFilter, TapMutation,
};
pub use error::{Error, ErrorKind, Result};
pub use storage_op::StorageOpType;
