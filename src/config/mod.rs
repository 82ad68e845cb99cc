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

pub mod fetch;
pub mod parse;

use serde::{Deserialize, Serialize};

/// The slice of a bucket's streaming config document this client actually
/// consumes: the vbucket-to-server map. Everything else the server sends
/// (ddocs, capabilities, node ports) is out of scope and dropped on parse.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VBucketServerMap {
    #[serde(alias = "hashAlgorithm")]
    pub hash_algorithm: String,
    #[serde(alias = "numReplicas")]
    pub num_replicas: usize,
    #[serde(alias = "serverList")]
    pub server_list: Vec<String>,
    #[serde(alias = "vBucketMap")]
    pub vbucket_map: Vec<Vec<i16>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BucketConfigDocument {
    #[serde(alias = "rev")]
    pub rev: i64,
    #[serde(alias = "vBucketServerMap")]
    pub vbucket_server_map: Option<VBucketServerMap>,
}
