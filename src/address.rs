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

use std::fmt::Display;
use std::net::SocketAddr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    /// Parses a `host:port` pair as carried in a bucket config's
    /// `serverList`. IPv6 literals are not bracketed in that wire format,
    /// so the split is on the last colon.
    pub fn parse(host_port: &str) -> Result<Self> {
        let (host, port) = host_port
            .rsplit_once(':')
            .ok_or_else(|| Error::new_invalid_argument(format!("not a host:port pair: {host_port}")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::new_invalid_argument(format!("invalid port in {host_port}")))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The ordered candidate list a server's hostname resolves to, with a cursor
/// tracking which candidate the connection state machine is currently
/// attempting. Mirrors the `CONNECTING(address i)` states: a failed connect
/// advances the cursor rather than giving up, so a single bad address in a
/// DNS round-robin doesn't fail the whole server.
#[derive(Debug, Clone)]
pub struct CandidateList {
    candidates: Vec<SocketAddr>,
    cursor: usize,
}

impl CandidateList {
    pub fn new(candidates: Vec<SocketAddr>) -> Self {
        Self {
            candidates,
            cursor: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The candidate the cursor currently points at, or `None` once every
    /// candidate has been tried and failed.
    pub fn current(&self) -> Option<SocketAddr> {
        self.candidates.get(self.cursor).copied()
    }

    /// Index of the candidate currently being attempted, for surfacing the
    /// `CONNECTING(address i)` state.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Advances past the current candidate. Returns `false` once the list is
    /// exhausted, at which point the server should transition to `CLOSED`.
    pub fn advance(&mut self) -> bool {
        self.cursor += 1;
        self.cursor < self.candidates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_through_candidates_until_exhausted() {
        let mut list = CandidateList::new(vec![
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
        ]);
        assert_eq!(list.current().unwrap().port(), 1);
        assert!(list.advance());
        assert_eq!(list.current().unwrap().port(), 2);
        assert!(!list.advance());
        assert_eq!(list.current(), None);
    }
}
