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

use std::net::SocketAddr;
use std::sync::Arc;

use crate::memdx::error::Error as MemdxError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    pub kind: Arc<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Arc::new(kind),
        }
    }

    pub fn is_memdx_error(&self) -> Option<&MemdxError> {
        match self.kind.as_ref() {
            ErrorKind::Memdx { source, .. } => Some(source),
            _ => None,
        }
    }

    pub(crate) fn new_invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument { msg: msg.into() })
    }

    pub(crate) fn new_invalid_vbucket_map(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidVbucketMap { msg: msg.into() })
    }

    pub(crate) fn new_no_vbucket_map() -> Self {
        Self::new(ErrorKind::NoVbucketMap)
    }

    pub(crate) fn new_no_server_assigned(requested_vb_id: u16) -> Self {
        Self::new(ErrorKind::NoServerAssigned { requested_vb_id })
    }

    pub(crate) fn new_memdx_error(
        source: MemdxError,
        dispatched_to: Option<SocketAddr>,
    ) -> Self {
        Self::new(ErrorKind::Memdx {
            source,
            dispatched_to: dispatched_to.map(|a| a.to_string()),
        })
    }

    pub(crate) fn new_config_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config { msg: msg.into() })
    }

    pub(crate) fn new_shutdown() -> Self {
        Self::new(ErrorKind::Shutdown)
    }
}

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("invalid argument: {msg}")]
    #[non_exhaustive]
    InvalidArgument { msg: String },
    #[error("{source} (dispatched to: {dispatched_to:?})")]
    Memdx {
        source: MemdxError,
        dispatched_to: Option<String>,
    },
    #[error("no vbucket configuration installed")]
    NoVbucketMap,
    #[error("invalid vbucket map: {msg}")]
    #[non_exhaustive]
    InvalidVbucketMap { msg: String },
    #[error("no server assigned to vbucket {requested_vb_id}")]
    NoServerAssigned { requested_vb_id: u16 },
    #[error("client is shut down")]
    Shutdown,
    #[error("configuration error: {msg}")]
    #[non_exhaustive]
    Config { msg: String },
}

impl From<MemdxError> for Error {
    fn from(value: MemdxError) -> Self {
        Self::new_memdx_error(value, None)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::new_config_error(value.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::new_config_error(value.to_string())
    }
}
