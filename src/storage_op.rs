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

use crate::memdx::opcode::OpCode;

/// Selects which STORE-family opcode a `store` call is framed as.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StorageOpType {
    Add,
    Replace,
    Set,
    Append,
    Prepend,
}

impl StorageOpType {
    pub fn op_code(&self) -> OpCode {
        match self {
            StorageOpType::Add => OpCode::Add,
            StorageOpType::Replace => OpCode::Replace,
            StorageOpType::Set => OpCode::Set,
            StorageOpType::Append => OpCode::Append,
            StorageOpType::Prepend => OpCode::Prepend,
        }
    }

    /// SET/ADD/REPLACE carry flags+expiration extras; APPEND/PREPEND carry none.
    pub fn takes_flags_and_expiration(&self) -> bool {
        matches!(self, StorageOpType::Add | StorageOpType::Replace | StorageOpType::Set)
    }
}
