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

use crate::error::{Error, Result};

/// An immutable snapshot of which server owns each vbucket. Total vbucket
/// count is fixed at construction and must be a power of two; replacement
/// happens by installing a whole new map, never by mutating this one.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VbucketMap {
    /// vbucket id -> owning server index.
    masters: Vec<i16>,
    mask: u32,
}

impl VbucketMap {
    pub fn new(masters: Vec<i16>) -> Result<Self> {
        let count = masters.len();
        if count == 0 || !count.is_power_of_two() {
            return Err(Error::new_invalid_vbucket_map(
                "vbucket count must be a nonzero power of two",
            ));
        }

        Ok(Self {
            masters,
            mask: (count - 1) as u32,
        })
    }

    pub fn num_vbuckets(&self) -> usize {
        self.masters.len()
    }

    /// CRC32 over the key, masked to the vbucket count. `count` is a power
    /// of two, so masking with `count - 1` is equivalent to the classic
    /// `(checksum >> 16 & 0x7fff) % count` modulus.
    pub fn vbucket_by_key(&self, key: &[u8]) -> u16 {
        let checksum = crc32fast::hash(key);
        ((checksum >> 16) & self.mask) as u16
    }

    pub fn server_by_vbucket(&self, vb_id: u16) -> Result<i16> {
        self.masters
            .get(vb_id as usize)
            .copied()
            .ok_or_else(|| Error::new_invalid_vbucket_map(format!("no such vbucket {vb_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_a_non_power_of_two_vbucket_count() {
        assert!(VbucketMap::new(vec![0; 48]).is_err());
        assert!(VbucketMap::new(vec![0; 13]).is_err());
        assert!(VbucketMap::new(vec![]).is_err());
    }

    #[test]
    fn hashes_keys_the_same_way_regardless_of_vbucket_count_being_a_power_of_two() {
        let vb_map = VbucketMap::new(vec![0; 1024]).unwrap();

        assert_eq!(0x0202, vb_map.vbucket_by_key(&[0]));
        assert_eq!(0x00aa, vb_map.vbucket_by_key(&[0, 1, 2, 3, 4, 5, 6, 7]));
        assert_eq!(0x0210, vb_map.vbucket_by_key(b"hello"));
        assert_eq!(
            0x03d4,
            vb_map.vbucket_by_key(b"hello world, I am a super long key lets see if it works")
        );
    }

    #[test]
    fn hashes_keys_consistently_at_a_smaller_power_of_two() {
        let vb_map = VbucketMap::new(vec![0; 64]).unwrap();

        assert_eq!(0x0002, vb_map.vbucket_by_key(&[0]));
        assert_eq!(0x002a, vb_map.vbucket_by_key(&[0, 1, 2, 3, 4, 5, 6, 7]));
        assert_eq!(0x0010, vb_map.vbucket_by_key(b"hello"));
        assert_eq!(
            0x0014,
            vb_map.vbucket_by_key(b"hello world, I am a super long key lets see if it works")
        );
    }

    #[test]
    fn resolving_is_a_pure_function_of_key_and_configuration() {
        let vb_map = VbucketMap::new(vec![0; 1024]).unwrap();
        assert_eq!(
            vb_map.vbucket_by_key(b"repeatable"),
            vb_map.vbucket_by_key(b"repeatable")
        );
    }

    #[test]
    fn looks_up_the_master_server_for_a_vbucket() {
        let vb_map = VbucketMap::new(vec![0, 1, 0, 1]).unwrap();
        assert_eq!(vb_map.server_by_vbucket(1).unwrap(), 1);
        assert!(vb_map.server_by_vbucket(4).is_err());
    }
}
