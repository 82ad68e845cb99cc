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

/// Binary-protocol opcodes covering the operation families this core dispatches:
/// GET, STORE, ARITHMETIC, REMOVE, SASL, and TAP.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OpCode {
    Get,
    GetQ,
    GetK,
    GetKQ,
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Delete,
    Increment,
    Decrement,
    SaslListMechs,
    SaslAuth,
    SaslStep,
    TapConnect,
    TapMutation,
    TapDelete,
    TapFlush,
    TapOpaque,
    TapVbucketSet,
    TapCheckpointStart,
    TapCheckpointEnd,
    Unknown(u8),
}

impl OpCode {
    /// `GetQ`/`GetKQ` are quiet the other way round from the rest of the
    /// binary protocol's `Q` opcodes: a hit still gets a response, only a
    /// miss (or the next non-quiet command terminating the batch) is
    /// silent. `deliver_synthesized` relies on this: a skipped get-family
    /// entry is synthesized as a miss, not a success.
    pub fn is_quiet(&self) -> bool {
        matches!(self, OpCode::GetQ | OpCode::GetKQ)
    }

    pub fn is_get_family(&self) -> bool {
        matches!(self, OpCode::Get | OpCode::GetQ | OpCode::GetK | OpCode::GetKQ)
    }

    /// Pushed to a server by the cluster, unsolicited, once a TAP stream is
    /// open; these never go through the opaque-keyed command log.
    pub fn is_tap_event(&self) -> bool {
        matches!(
            self,
            OpCode::TapMutation
                | OpCode::TapDelete
                | OpCode::TapFlush
                | OpCode::TapOpaque
                | OpCode::TapVbucketSet
                | OpCode::TapCheckpointStart
                | OpCode::TapCheckpointEnd
        )
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        match value {
            OpCode::Get => 0x00,
            OpCode::Set => 0x01,
            OpCode::Add => 0x02,
            OpCode::Replace => 0x03,
            OpCode::Delete => 0x04,
            OpCode::Increment => 0x05,
            OpCode::Decrement => 0x06,
            OpCode::GetQ => 0x09,
            OpCode::GetK => 0x0c,
            OpCode::GetKQ => 0x0d,
            OpCode::Append => 0x0e,
            OpCode::Prepend => 0x0f,
            OpCode::SaslListMechs => 0x20,
            OpCode::SaslAuth => 0x21,
            OpCode::SaslStep => 0x22,
            OpCode::TapConnect => 0x40,
            OpCode::TapMutation => 0x41,
            OpCode::TapDelete => 0x42,
            OpCode::TapFlush => 0x43,
            OpCode::TapOpaque => 0x44,
            OpCode::TapVbucketSet => 0x45,
            OpCode::TapCheckpointStart => 0x46,
            OpCode::TapCheckpointEnd => 0x47,
            OpCode::Unknown(code) => code,
        }
    }
}

impl From<u8> for OpCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => OpCode::Get,
            0x01 => OpCode::Set,
            0x02 => OpCode::Add,
            0x03 => OpCode::Replace,
            0x04 => OpCode::Delete,
            0x05 => OpCode::Increment,
            0x06 => OpCode::Decrement,
            0x09 => OpCode::GetQ,
            0x0c => OpCode::GetK,
            0x0d => OpCode::GetKQ,
            0x0e => OpCode::Append,
            0x0f => OpCode::Prepend,
            0x20 => OpCode::SaslListMechs,
            0x21 => OpCode::SaslAuth,
            0x22 => OpCode::SaslStep,
            0x40 => OpCode::TapConnect,
            0x41 => OpCode::TapMutation,
            0x42 => OpCode::TapDelete,
            0x43 => OpCode::TapFlush,
            0x44 => OpCode::TapOpaque,
            0x45 => OpCode::TapVbucketSet,
            0x46 => OpCode::TapCheckpointStart,
            0x47 => OpCode::TapCheckpointEnd,
            other => OpCode::Unknown(other),
        }
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let txt = match self {
            OpCode::Get => "Get",
            OpCode::GetQ => "GetQ",
            OpCode::GetK => "GetK",
            OpCode::GetKQ => "GetKQ",
            OpCode::Set => "Set",
            OpCode::Add => "Add",
            OpCode::Replace => "Replace",
            OpCode::Append => "Append",
            OpCode::Prepend => "Prepend",
            OpCode::Delete => "Delete",
            OpCode::Increment => "Increment",
            OpCode::Decrement => "Decrement",
            OpCode::SaslListMechs => "SaslListMechs",
            OpCode::SaslAuth => "SaslAuth",
            OpCode::SaslStep => "SaslStep",
            OpCode::TapConnect => "TapConnect",
            OpCode::TapMutation => "TapMutation",
            OpCode::TapDelete => "TapDelete",
            OpCode::TapFlush => "TapFlush",
            OpCode::TapOpaque => "TapOpaque",
            OpCode::TapVbucketSet => "TapVbucketSet",
            OpCode::TapCheckpointStart => "TapCheckpointStart",
            OpCode::TapCheckpointEnd => "TapCheckpointEnd",
            OpCode::Unknown(code) => return write!(f, "x{code:02x}"),
        };
        write!(f, "{txt}")
    }
}
