use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Decoder;

use vbucket_kv_core::memdx::codec::KeyValueCodec;
use vbucket_kv_core::memdx::opcode::OpCode;
use vbucket_kv_core::memdx::packet::ResponsePacket;

/// One incoming request as seen by a mock node. `ResponsePacket` is reused
/// as the decode target since the 24-byte header layout is identical in
/// both directions -- only the meaning of the status/vbucket slot and the
/// magic byte differ, and we don't need either here.
pub struct MockRequest {
    pub op_code: OpCode,
    pub opaque: u32,
    pub key: Vec<u8>,
    pub extras: Vec<u8>,
    #[allow(dead_code)]
    pub value: Vec<u8>,
}

impl From<ResponsePacket> for MockRequest {
    fn from(packet: ResponsePacket) -> Self {
        Self {
            op_code: packet.op_code,
            opaque: packet.opaque,
            key: packet.key.unwrap_or_default(),
            extras: packet.extras.unwrap_or_default(),
            value: packet.value.unwrap_or_default(),
        }
    }
}

/// Reads exactly one wire frame off `stream`, buffering across partial
/// reads. The crate's own decoder doesn't care which side sent the frame.
pub async fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> MockRequest {
    let mut codec = KeyValueCodec::default();
    loop {
        if let Some(packet) = codec.decode(buf).expect("well-formed wire frame") {
            return packet.into();
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.expect("peer still connected");
        assert!(n > 0, "peer closed mid-frame");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Hand-encodes a response frame. The crate's codec only encodes
/// `RequestPacket`s (always magic 0x80), so a mock server answering with
/// magic 0x81 has to lay the bytes out itself.
pub fn encode_response(
    op_code: OpCode,
    status: u16,
    opaque: u32,
    cas: u64,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) -> Vec<u8> {
    let total_body = extras.len() + key.len() + value.len();
    let mut out = Vec::with_capacity(24 + total_body);
    out.push(0x81);
    out.push(op_code.into());
    out.extend_from_slice(&(key.len() as u16).to_be_bytes());
    out.push(extras.len() as u8);
    out.push(0);
    out.extend_from_slice(&status.to_be_bytes());
    out.extend_from_slice(&(total_body as u32).to_be_bytes());
    out.extend_from_slice(&opaque.to_be_bytes());
    out.extend_from_slice(&cas.to_be_bytes());
    out.extend_from_slice(extras);
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    out
}

pub async fn write_response(
    stream: &mut TcpStream,
    op_code: OpCode,
    status: u16,
    opaque: u32,
    cas: u64,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) {
    let frame = encode_response(op_code, status, opaque, cas, extras, key, value);
    stream.write_all(&frame).await.expect("write response frame");
}

/// Accepts one connection and drives the SASL PLAIN handshake to success,
/// regardless of what credentials the client actually offers -- the mock
/// only needs the handshake to complete before real traffic starts.
pub async fn accept_and_authenticate(listener: &TcpListener) -> (TcpStream, BytesMut) {
    let (mut stream, _) = listener.accept().await.expect("accept kv connection");
    let mut buf = BytesMut::new();

    let list_req = read_frame(&mut stream, &mut buf).await;
    assert_eq!(list_req.op_code, OpCode::SaslListMechs);
    write_response(&mut stream, OpCode::SaslListMechs, 0, list_req.opaque, 0, &[], &[], b"PLAIN").await;

    let auth_req = read_frame(&mut stream, &mut buf).await;
    assert_eq!(auth_req.op_code, OpCode::SaslAuth);
    write_response(&mut stream, OpCode::SaslAuth, 0, auth_req.opaque, 0, &[], &[], &[]).await;

    (stream, buf)
}

/// Spins up a bucket-config HTTP endpoint on an ephemeral port that always
/// answers with one `bucketsStreaming` document describing a single vbucket
/// map, all four vbuckets owned by the one node at `kv_port`, then closes
/// the connection. Enough for `Client::connect()` to install routing and
/// return.
pub async fn spawn_config_server(kv_port: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind config listener");
    let addr = listener.local_addr().expect("config listener local addr");

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut discard = [0u8; 4096];
                let _ = stream.read(&mut discard).await;

                let body = format!(
                    "{{\"rev\":1,\"vBucketServerMap\":{{\"hashAlgorithm\":\"CRC\",\"numReplicas\":0,\
                     \"serverList\":[\"$HOST:{kv_port}\"],\"vBucketMap\":[[0],[0],[0],[0]]}}}}\n"
                );
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{body}"
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}
