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

/// A growable byte region bytes are appended to and later drained from in
/// order. This is the `pending` queue a server accumulates into while it is
/// not yet `READY`: encoded request bytes land here instead of a live
/// socket, and the whole contents move across atomically once the
/// connection authenticates (the spec's `output`/`input` buffers are
/// realized directly by Tokio's framed socket I/O instead, per the ambient
/// event-loop writeup).
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn peek(&self) -> &[u8] {
        &self.data
    }

    /// Drains and returns the entire buffer, leaving it empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_appended_bytes_in_order() {
        let mut buf = Buffer::new();
        buf.append(b"hello");
        buf.append(b" world");
        assert_eq!(buf.peek(), b"hello world");
        assert_eq!(buf.len(), 11);
    }

    #[test]
    fn take_drains_and_empties_the_buffer() {
        let mut buf = Buffer::new();
        buf.append(b"pending bytes");
        let taken = buf.take();
        assert_eq!(taken, b"pending bytes");
        assert!(buf.is_empty());
    }
}
