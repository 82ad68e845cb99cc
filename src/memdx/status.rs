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

use std::fmt::{Display, Formatter};

/// Response status codes, as carried in the header's vbucket/status field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    KeyNotFound,
    KeyExists,
    TooBig,
    InvalidArgs,
    NotStored,
    BadDelta,
    NotMyVbucket,
    AuthError,
    AuthContinue,
    CommandUnknown,
    OutOfMemory,
    Unknown(u16),
}

impl From<Status> for u16 {
    fn from(value: Status) -> Self {
        match value {
            Status::Success => 0x0000,
            Status::KeyNotFound => 0x0001,
            Status::KeyExists => 0x0002,
            Status::TooBig => 0x0003,
            Status::InvalidArgs => 0x0004,
            Status::NotStored => 0x0005,
            Status::BadDelta => 0x0006,
            Status::NotMyVbucket => 0x0007,
            Status::AuthError => 0x0020,
            Status::AuthContinue => 0x0021,
            Status::CommandUnknown => 0x0081,
            Status::OutOfMemory => 0x0082,
            Status::Unknown(v) => v,
        }
    }
}

impl From<u16> for Status {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => Status::Success,
            0x0001 => Status::KeyNotFound,
            0x0002 => Status::KeyExists,
            0x0003 => Status::TooBig,
            0x0004 => Status::InvalidArgs,
            0x0005 => Status::NotStored,
            0x0006 => Status::BadDelta,
            0x0007 => Status::NotMyVbucket,
            0x0020 => Status::AuthError,
            0x0021 => Status::AuthContinue,
            0x0081 => Status::CommandUnknown,
            0x0082 => Status::OutOfMemory,
            other => Status::Unknown(other),
        }
    }
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let txt = match self {
            Status::Success => "success",
            Status::KeyNotFound => "key not found",
            Status::KeyExists => "key exists",
            Status::TooBig => "too big",
            Status::InvalidArgs => "invalid args",
            Status::NotStored => "not stored",
            Status::BadDelta => "bad delta",
            Status::NotMyVbucket => "not my vbucket",
            Status::AuthError => "authentication error",
            Status::AuthContinue => "authentication continue",
            Status::CommandUnknown => "unknown command",
            Status::OutOfMemory => "out of memory",
            Status::Unknown(v) => return write!(f, "unknown status 0x{v:04x}"),
        };
        write!(f, "{txt}")
    }
}
