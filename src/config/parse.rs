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

use crate::config::BucketConfigDocument;
use crate::error::{Error, Result};
use crate::vbucketmap::VbucketMap;
use crate::vbucketrouter::RoutingInfo;

/// Parses one NDJSON line of a `bucketsStreaming` response, substituting
/// `$HOST` for the address the document was fetched from (the server
/// elides its own hostname this way), and turns the resulting
/// `vBucketServerMap` into routing info ready to install on the client.
pub fn parse_bucket_config(line: &str, source_host: &str) -> Result<RoutingInfo> {
    let substituted = line.replace("$HOST", source_host);

    let doc: BucketConfigDocument = serde_json::from_str(&substituted)?;

    let map = doc
        .vbucket_server_map
        .ok_or_else(|| Error::new_config_error("config document has no vBucketServerMap"))?;

    let masters = map
        .vbucket_map
        .iter()
        .map(|entry| entry.first().copied().unwrap_or(-1))
        .collect();

    Ok(RoutingInfo {
        vbucket_map: VbucketMap::new(masters)?,
        servers: map.server_list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_bucket_config_document() {
        let doc = r#"{
            "rev": 1,
            "vBucketServerMap": {
                "hashAlgorithm": "CRC",
                "numReplicas": 1,
                "serverList": ["$HOST:11210", "other:11210"],
                "vBucketMap": [[0, 1], [1, 0], [0, 1], [1, 0]]
            }
        }"#;

        let info = parse_bucket_config(doc, "10.0.0.1").unwrap();
        assert_eq!(info.servers[0], "10.0.0.1:11210");
        assert_eq!(info.vbucket_map.num_vbuckets(), 4);
    }

    #[test]
    fn rejects_a_document_with_no_server_map() {
        let doc = r#"{"rev": 1}"#;
        assert!(parse_bucket_config(doc, "10.0.0.1").is_err());
    }
}
