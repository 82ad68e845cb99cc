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

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{Error, Result};
use crate::vbucketmap::VbucketMap;

/// A vbucket map plus the ordered server list it indexes into. Installed as
/// a single unit so a handler never observes a vbucket id that points past
/// the end of a half-updated server list.
#[derive(Debug, Clone)]
pub struct RoutingInfo {
    pub vbucket_map: VbucketMap,
    pub servers: Vec<String>,
}

/// Resolves keys to server indices against the most recently installed
/// configuration, and accepts atomic replacement on topology change or
/// `NOT_MY_VBUCKET`.
pub struct VbucketRouter {
    info: ArcSwap<Option<RoutingInfo>>,
}

impl VbucketRouter {
    pub fn new() -> Self {
        Self {
            info: ArcSwap::from_pointee(None),
        }
    }

    pub fn update(&self, info: RoutingInfo) {
        self.info.store(Arc::new(Some(info)));
    }

    /// `resolve(key, hashkey)` — the key actually hashed is `hashkey` when
    /// supplied, else `key`, letting callers co-locate related items under
    /// one vbucket. No configuration installed yet is a network-layer
    /// condition, not a malformed map, so it reports `NoVbucketMap` rather
    /// than `InvalidVbucketMap`.
    pub fn resolve(&self, key: &[u8], hashkey: Option<&[u8]>) -> Result<(u16, usize)> {
        let guard = self.info.load();
        let info = guard.as_ref().as_ref().ok_or_else(Error::new_no_vbucket_map)?;

        let hashed = hashkey.unwrap_or(key);
        let vb_id = info.vbucket_map.vbucket_by_key(hashed);
        let server_idx = info.vbucket_map.server_by_vbucket(vb_id)?;

        if server_idx < 0 {
            return Err(Error::new_no_server_assigned(vb_id));
        }

        let server_idx = server_idx as usize;
        if server_idx >= info.servers.len() {
            return Err(Error::new_no_server_assigned(vb_id));
        }

        Ok((vb_id, server_idx))
    }

    pub fn server_address(&self, server_idx: usize) -> Option<String> {
        let guard = self.info.load();
        guard
            .as_ref()
            .as_ref()
            .and_then(|info| info.servers.get(server_idx).cloned())
    }
}

impl Default for VbucketRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_keys_to_their_master_server_index() {
        let router = VbucketRouter::new();
        router.update(RoutingInfo {
            vbucket_map: VbucketMap::new(vec![0, 1, 0, 1]).unwrap(),
            servers: vec!["node-a".to_string(), "node-b".to_string()],
        });

        let (vb_id, server_idx) = router.resolve(b"key1", None).unwrap();
        assert_eq!(router.server_address(server_idx).unwrap(), {
            if server_idx == 0 { "node-a" } else { "node-b" }
        });
        assert!(vb_id < 4);
    }

    #[test]
    fn a_hashkey_overrides_the_key_for_hashing_but_not_identity() {
        let router = VbucketRouter::new();
        router.update(RoutingInfo {
            vbucket_map: VbucketMap::new(vec![0; 4]).unwrap(),
            servers: vec!["node-a".to_string()],
        });

        let (vb_with_hashkey, _) = router.resolve(b"key1", Some(b"group")).unwrap();
        let (vb_direct, _) = router.resolve(b"group", None).unwrap();
        assert_eq!(vb_with_hashkey, vb_direct);
    }

    #[test]
    fn fails_before_any_configuration_is_installed() {
        let router = VbucketRouter::new();
        assert!(router.resolve(b"key1", None).is_err());
    }
}
