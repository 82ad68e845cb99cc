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

use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::io;

use crate::memdx::opcode::OpCode;
use crate::memdx::status::Status;

pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level errors: framing, connection setup, and the server's own
/// status codes translated into a typed cause.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub(crate) fn new_protocol_error(msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Protocol { msg: msg.into() },
            source: None,
        }
    }

    pub(crate) fn new_connection_failed_error(
        msg: impl Into<String>,
        source: Box<dyn StdError + Send + Sync>,
    ) -> Self {
        Self {
            kind: ErrorKind::ConnectionFailed { msg: msg.into() },
            source: Some(source),
        }
    }

    pub(crate) fn new_invalid_argument_error(msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidArgument { msg: msg.into() },
            source: None,
        }
    }

    pub(crate) fn new_cancelled_error() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            source: None,
        }
    }

    pub(crate) fn from_server(server: ServerError) -> Self {
        Self {
            kind: ErrorKind::Server(server),
            source: None,
        }
    }

    pub(crate) fn new_sasl_error(msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Sasl { msg: msg.into() },
            source: None,
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn as_server_error(&self) -> Option<&ServerError> {
        match &self.kind {
            ErrorKind::Server(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            source: Some(Box::new(value)),
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    Server(ServerError),
    Protocol { msg: String },
    ConnectionFailed { msg: String },
    InvalidArgument { msg: String },
    Sasl { msg: String },
    Cancelled,
    Io,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Server(e) => write!(f, "{e}"),
            ErrorKind::Protocol { msg } => write!(f, "protocol error: {msg}"),
            ErrorKind::ConnectionFailed { msg } => write!(f, "connection failed: {msg}"),
            ErrorKind::InvalidArgument { msg } => write!(f, "invalid argument: {msg}"),
            ErrorKind::Sasl { msg } => write!(f, "sasl negotiation failed: {msg}"),
            ErrorKind::Cancelled => write!(f, "request cancelled"),
            ErrorKind::Io => write!(f, "i/o error"),
        }
    }
}

/// A non-success status returned by the server for a specific request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub status: Status,
    pub op_code: OpCode,
    pub opaque: u32,
}

impl ServerError {
    pub fn new(status: Status, op_code: OpCode, opaque: u32) -> Self {
        Self {
            status,
            op_code,
            opaque,
        }
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "server error: {} (opcode {}, opaque {})",
            self.status, self.op_code, self.opaque
        )
    }
}

impl StdError for ServerError {}
