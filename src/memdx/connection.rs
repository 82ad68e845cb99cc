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
use std::time::Duration;

use socket2::TcpKeepalive;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

use crate::memdx::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub deadline: Instant,
    pub tcp_keep_alive_time: Duration,
}

/// A connected TCP socket to a single resolved candidate address, tuned the
/// way a long-lived multiplexed connection should be: keepalive on, Nagle's
/// algorithm left enabled since requests are pipelined rather than sent one
/// at a time.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl Connection {
    pub async fn connect(addr: SocketAddr, opts: ConnectOptions) -> Result<Connection> {
        let stream = timeout_at(opts.deadline, TcpStream::connect(addr))
            .await
            .map_err(|e| {
                Error::new_connection_failed_error(
                    "connect timed out",
                    Box::new(io::Error::new(io::ErrorKind::TimedOut, e)),
                )
            })?
            .map_err(|e| Error::new_connection_failed_error("connect failed", Box::new(e)))?;

        let local_addr = stream
            .local_addr()
            .map_err(|e| Error::new_connection_failed_error("no local address", Box::new(e)))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| Error::new_connection_failed_error("no peer address", Box::new(e)))?;

        socket2::SockRef::from(&stream)
            .set_tcp_keepalive(&TcpKeepalive::new().with_time(opts.tcp_keep_alive_time))
            .map_err(|e| Error::new_connection_failed_error("failed to set keepalive", Box::new(e)))?;

        Ok(Connection {
            stream,
            local_addr,
            peer_addr,
        })
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}
