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

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::memdx::error::Error;
use crate::memdx::magic::Magic;
use crate::memdx::opcode::OpCode;
use crate::memdx::packet::{RequestPacket, ResponsePacket};
use crate::memdx::status::Status;

pub const HEADER_SIZE: usize = 24;

/// Frames the 24-byte fixed binary-protocol header plus extras/key/value body.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct KeyValueCodec(());

impl Decoder for KeyValueCodec {
    type Item = ResponsePacket;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let total_body_len = u32::from_be_bytes(buf[8..12].try_into().unwrap()) as usize;

        if buf.len() < HEADER_SIZE + total_body_len {
            buf.reserve(HEADER_SIZE + total_body_len - buf.len());
            return Ok(None);
        }

        let mut slice = buf.split_to(HEADER_SIZE + total_body_len);

        let magic = Magic::try_from(slice.get_u8())?;
        let opcode = OpCode::from(slice.get_u8());
        let key_len = slice.get_u16() as usize;
        let extras_len = slice.get_u8() as usize;
        let datatype = slice.get_u8();
        let status = Status::from(slice.get_u16());
        let total_body_len = slice.get_u32() as usize;
        let opaque = slice.get_u32();
        let cas = slice.get_u64();

        if total_body_len < key_len + extras_len {
            return Err(Error::new_protocol_error(
                "total body length smaller than key+extras length",
            ));
        }
        let value_len = total_body_len - key_len - extras_len;

        let mut packet = ResponsePacket::new(magic, opcode, datatype, status, opaque);
        packet.cas = Some(cas);

        if extras_len > 0 {
            packet.extras = Some(slice[..extras_len].to_vec());
        }
        if key_len > 0 {
            packet.key = Some(slice[extras_len..extras_len + key_len].to_vec());
        }
        if value_len > 0 {
            packet.value = Some(slice[extras_len + key_len..].to_vec());
        }

        Ok(Some(packet))
    }
}

impl Encoder<RequestPacket<'_>> for KeyValueCodec {
    type Error = Error;

    fn encode(&mut self, item: RequestPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let key_size = item.key.map_or(0, |k| k.len());
        let extras_size = item.extras.map_or(0, |e| e.len());
        let body_size = item.value.map_or(0, |v| v.len());
        let total_body_size = key_size + extras_size + body_size;

        if key_size > u16::MAX as usize {
            return Err(Error::new_invalid_argument_error("key too large"));
        }

        dst.reserve(HEADER_SIZE + total_body_size);

        dst.put_u8(item.magic.into());
        dst.put_u8(item.op_code.into());
        dst.put_u16(key_size as u16);
        dst.put_u8(extras_size as u8);
        dst.put_u8(item.datatype);
        dst.put_u16(item.vbucket_id.unwrap_or_default());
        dst.put_u32(total_body_size as u32);
        dst.put_u32(item.opaque.unwrap_or_default());
        dst.put_u64(item.cas.unwrap_or_default());

        if let Some(extras) = item.extras {
            dst.extend_from_slice(extras);
        }
        if let Some(key) = item.key {
            dst.extend_from_slice(key);
        }
        if let Some(value) = item.value {
            dst.extend_from_slice(value);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_get_request_and_response() {
        let mut codec = KeyValueCodec::default();
        let mut buf = BytesMut::new();

        let req = RequestPacket::new(OpCode::Get, 0)
            .vbucket_id(12)
            .opaque(7)
            .key(b"hello");
        codec.encode(req, &mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_SIZE + 5);
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 0x00);

        // Flip magic/status bytes to synthesize a response over the same bytes.
        buf[0] = 0x81;
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.magic, Magic::Res);
        assert_eq!(packet.op_code, OpCode::Get);
        assert_eq!(packet.opaque, 7);
        assert_eq!(packet.key.as_deref(), Some(b"hello".as_slice()));
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_a_full_frame_before_decoding() {
        let mut codec = KeyValueCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0u8; HEADER_SIZE - 1]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }
}
