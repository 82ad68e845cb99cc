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

use std::collections::VecDeque;

use crate::memdx::error::Error;
use crate::memdx::opcode::OpCode;

/// Anything that can sit in a server's command log: a record of one
/// dispatched request whose response has not yet been accounted for.
pub trait LoggedEntry {
    fn opaque(&self) -> u32;
    fn op_code(&self) -> OpCode;
}

/// Result of purging a command log up to a freshly arrived response's
/// opaque: the quiet commands that were skipped over (and must be
/// delivered a synthetic callback) plus the entry the response actually
/// belongs to, if still logged.
pub struct PurgeResult<T> {
    pub synthesized: Vec<T>,
    pub matched: Option<T>,
}

/// The per-server ordered log of outstanding requests (the spec's
/// `cmd_log`), keyed by opaque and consulted on every incoming response to
/// apply the implicit-response purge rule for quiet opcodes.
#[derive(Debug)]
pub struct CommandLog<T> {
    entries: VecDeque<T>,
}

impl<T: LoggedEntry> CommandLog<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Applies the purge rule for a response carrying opaque `response_opaque`:
    /// walk the log from the front, synthesizing a callback for every entry
    /// whose opaque precedes it (quiet opcodes only — a non-quiet opcode in
    /// that gap is a protocol violation), then detach the matching entry
    /// itself for real delivery.
    ///
    /// Comparisons are widened into a 64-bit window anchored at the oldest
    /// logged entry so a 32-bit opaque wraparound spanning the purge
    /// boundary cannot be misordered.
    pub fn purge_to(&mut self, response_opaque: u32) -> Result<PurgeResult<T>, Error> {
        let base = self
            .entries
            .front()
            .map(LoggedEntry::opaque)
            .unwrap_or(response_opaque);
        let target = forward_distance(base, response_opaque);

        let mut synthesized = Vec::new();
        while let Some(front) = self.entries.front() {
            if forward_distance(base, front.opaque()) >= target {
                break;
            }

            let entry = self.entries.pop_front().expect("front just peeked");
            if !entry.op_code().is_quiet() {
                return Err(Error::new_protocol_error(format!(
                    "non-quiet opcode {} with opaque {} skipped by response opaque {}",
                    entry.op_code(),
                    entry.opaque(),
                    response_opaque,
                )));
            }
            synthesized.push(entry);
        }

        let matched = match self.entries.front() {
            Some(front) if front.opaque() == response_opaque => self.entries.pop_front(),
            _ => None,
        };

        Ok(PurgeResult {
            synthesized,
            matched,
        })
    }

    /// Unconditionally empties the log, quiet or not. Used for teardown
    /// (`destroy()`, connection loss) where every outstanding request gets a
    /// synthetic cancellation rather than being protocol-violation-checked.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.entries.drain(..).collect()
    }
}

impl<T: LoggedEntry> Default for CommandLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn forward_distance(base: u32, x: u32) -> u64 {
    x.wrapping_sub(base) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Entry {
        opaque: u32,
        op_code: OpCode,
    }

    impl LoggedEntry for Entry {
        fn opaque(&self) -> u32 {
            self.opaque
        }

        fn op_code(&self) -> OpCode {
            self.op_code
        }
    }

    #[test]
    fn synthesizes_quiet_misses_skipped_before_the_terminator() {
        let mut log = CommandLog::new();
        log.push(Entry { opaque: 1, op_code: OpCode::GetQ });
        log.push(Entry { opaque: 2, op_code: OpCode::GetQ });
        log.push(Entry { opaque: 3, op_code: OpCode::GetK });

        let result = log.purge_to(3).unwrap();
        assert_eq!(result.synthesized.len(), 2);
        assert_eq!(result.matched.unwrap().opaque, 3);
        assert!(log.is_empty());
    }

    #[test]
    fn aborts_on_a_non_quiet_opcode_in_the_purge_gap() {
        let mut log = CommandLog::new();
        log.push(Entry { opaque: 1, op_code: OpCode::Set });
        log.push(Entry { opaque: 2, op_code: OpCode::GetK });

        assert!(log.purge_to(2).is_err());
    }

    #[test]
    fn handles_a_purge_boundary_that_crosses_an_opaque_wraparound() {
        let mut log = CommandLog::new();
        log.push(Entry {
            opaque: u32::MAX - 1,
            op_code: OpCode::GetQ,
        });
        log.push(Entry { opaque: 0, op_code: OpCode::GetK });

        let result = log.purge_to(0).unwrap();
        assert_eq!(result.synthesized.len(), 1);
        assert_eq!(result.matched.unwrap().opaque, 0);
    }

    #[test]
    fn drain_all_empties_the_log_regardless_of_quietness() {
        let mut log = CommandLog::new();
        log.push(Entry { opaque: 1, op_code: OpCode::Set });
        log.push(Entry { opaque: 2, op_code: OpCode::GetQ });
        assert_eq!(log.drain_all().len(), 2);
        assert!(log.is_empty());
    }
}
