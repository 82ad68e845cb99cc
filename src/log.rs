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

use uuid::Uuid;

/// Tags log lines with the client instance and, where relevant, the server
/// they concern, so interleaved output from many connections stays
/// attributable.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LogContext {
    pub client_id: String,
    pub server: Option<String>,
}

impl LogContext {
    pub fn new_client_id() -> String {
        let mut id = Uuid::new_v4().to_string();
        id.truncate(8);
        id
    }

    pub fn for_server(&self, server: impl Into<String>) -> Self {
        Self {
            client_id: self.client_id.clone(),
            server: Some(server.into()),
        }
    }
}

impl Display for LogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.server {
            Some(server) => write!(f, "(client={} server={})", self.client_id, server),
            None => write!(f, "(client={})", self.client_id),
        }
    }
}
