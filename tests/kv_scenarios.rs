//! End-to-end scenarios driven against an in-process mock memcached-wire
//! node plus a mock bucket-config HTTP endpoint, exercising `Client`
//! without a real cluster.

mod common;

use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;

use vbucket_kv_core::client::{Callbacks, ClientOptions};
use vbucket_kv_core::memdx::opcode::OpCode;
use vbucket_kv_core::memdx::status::Status;
use vbucket_kv_core::{Client, StorageOpType};

use common::{accept_and_authenticate, read_frame, spawn_config_server, write_response};

#[derive(Debug, Clone, PartialEq)]
enum Record {
    Get { key: Vec<u8>, value: Option<Vec<u8>> },
    Store { key: Vec<u8>, ok: bool },
    Arithmetic { key: Vec<u8>, value: Option<u64> },
    Remove { key: Vec<u8>, ok: bool },
}

type Recorder = Arc<Mutex<Vec<Record>>>;

async fn connected_client(kv_port: u16) -> Arc<Client> {
    let config_addr = spawn_config_server(kv_port).await;
    let options = ClientOptions::new("127.0.0.1", config_addr.port(), "default");
    let client = Client::create(options);
    client.connect().await.expect("client connects against the mock config endpoint");
    client
}

async fn install_recording_callbacks(client: &Arc<Client>) -> Recorder {
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));

    let get_recorder = Arc::clone(&recorder);
    let store_recorder = Arc::clone(&recorder);
    let arithmetic_recorder = Arc::clone(&recorder);
    let remove_recorder = Arc::clone(&recorder);

    let callbacks = Callbacks {
        get: Some(Arc::new(move |_client, key, result| {
            get_recorder.lock().unwrap().push(Record::Get {
                key: key.to_vec(),
                value: result.ok().map(|p| p.value),
            });
        })),
        store: Some(Arc::new(move |_client, key, result| {
            store_recorder.lock().unwrap().push(Record::Store {
                key: key.to_vec(),
                ok: result.is_ok(),
            });
        })),
        arithmetic: Some(Arc::new(move |_client, key, result| {
            arithmetic_recorder.lock().unwrap().push(Record::Arithmetic {
                key: key.to_vec(),
                value: result.ok().map(|p| p.value),
            });
        })),
        remove: Some(Arc::new(move |_client, key, result| {
            remove_recorder.lock().unwrap().push(Record::Remove {
                key: key.to_vec(),
                ok: result.is_ok(),
            });
        })),
        tap: None,
        error: None,
    };

    client.set_callbacks(callbacks).await;
    recorder
}

/// S1: a quiet `mget` batch where the middle key misses. The server sends
/// real responses for the hit and the `GetK` terminator, and nothing at all
/// for the miss -- the purge rule has to synthesize that one, and the three
/// callbacks must still fire in `a`, `b`, `c` order.
#[tokio::test]
async fn s1_quiet_batch_with_missing_middle_key() {
    let kv_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let kv_port = kv_listener.local_addr().unwrap().port();

    let client = connected_client(kv_port).await;
    let recorder = install_recording_callbacks(&client).await;

    let node = tokio::spawn(async move {
        let (mut stream, mut buf) = accept_and_authenticate(&kv_listener).await;

        let get_a = read_frame(&mut stream, &mut buf).await;
        assert_eq!(get_a.op_code, OpCode::GetQ);
        assert_eq!(get_a.key, b"a");
        write_response(&mut stream, OpCode::GetQ, 0, get_a.opaque, 0, &0u32.to_be_bytes(), &[], b"A").await;

        let get_b = read_frame(&mut stream, &mut buf).await;
        assert_eq!(get_b.op_code, OpCode::GetQ);
        assert_eq!(get_b.key, b"b");
        // Silent: b is a miss, so GetQ sends nothing back for it.

        let get_c = read_frame(&mut stream, &mut buf).await;
        assert_eq!(get_c.op_code, OpCode::GetK);
        assert_eq!(get_c.key, b"c");
        write_response(&mut stream, OpCode::GetK, 0, get_c.opaque, 0, &0u32.to_be_bytes(), b"c", b"C").await;
    });

    client
        .mget(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
        .await
        .unwrap();
    client.execute().await;
    node.await.unwrap();

    let records = recorder.lock().unwrap().clone();
    assert_eq!(
        records,
        vec![
            Record::Get { key: b"a".to_vec(), value: Some(b"A".to_vec()) },
            Record::Get { key: b"b".to_vec(), value: None },
            Record::Get { key: b"c".to_vec(), value: Some(b"C".to_vec()) },
        ]
    );

    client.destroy().await;
}

/// S3: a `STORE` rejected with a CAS conflict. The callback still receives
/// the key, with an error result rather than a synthesized success.
#[tokio::test]
async fn s3_store_reports_a_cas_conflict() {
    let kv_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let kv_port = kv_listener.local_addr().unwrap().port();

    let client = connected_client(kv_port).await;
    let recorder = install_recording_callbacks(&client).await;

    let node = tokio::spawn(async move {
        let (mut stream, mut buf) = accept_and_authenticate(&kv_listener).await;

        let set_req = read_frame(&mut stream, &mut buf).await;
        assert_eq!(set_req.op_code, OpCode::Set);
        assert_eq!(set_req.key, b"doc");
        write_response(&mut stream, OpCode::Set, u16::from(Status::KeyExists), set_req.opaque, 0, &[], &[], &[])
            .await;
    });

    client
        .store(StorageOpType::Set, b"doc".to_vec(), b"payload".to_vec(), 0, 0, 0xdead_beef)
        .await
        .unwrap();
    client.execute().await;
    node.await.unwrap();

    let records = recorder.lock().unwrap().clone();
    assert_eq!(records, vec![Record::Store { key: b"doc".to_vec(), ok: false }]);

    client.destroy().await;
}

/// S4: arithmetic with `create: true` against a key the server doesn't
/// have yet -- the server is free to either create it or report a miss
/// depending on its own policy; here it creates, returning the initial
/// value the protocol's extras carried.
#[tokio::test]
async fn s4_arithmetic_create_if_missing() {
    let kv_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let kv_port = kv_listener.local_addr().unwrap().port();

    let client = connected_client(kv_port).await;
    let recorder = install_recording_callbacks(&client).await;

    let node = tokio::spawn(async move {
        let (mut stream, mut buf) = accept_and_authenticate(&kv_listener).await;

        let incr_req = read_frame(&mut stream, &mut buf).await;
        assert_eq!(incr_req.op_code, OpCode::Increment);
        assert_eq!(incr_req.key, b"counter");
        // extras: delta magnitude (8B) + initial (8B) + expiration (4B)
        assert_eq!(incr_req.extras.len(), 20);
        let initial = u64::from_be_bytes(incr_req.extras[8..16].try_into().unwrap());
        assert_eq!(initial, 42);

        let mut value = Vec::with_capacity(8);
        value.extend_from_slice(&initial.to_be_bytes());
        write_response(&mut stream, OpCode::Increment, 0, incr_req.opaque, 0, &[], &[], &value).await;
    });

    client.arithmetic(b"counter".to_vec(), 5, 42, 0, true).await.unwrap();
    client.execute().await;
    node.await.unwrap();

    let records = recorder.lock().unwrap().clone();
    assert_eq!(records, vec![Record::Arithmetic { key: b"counter".to_vec(), value: Some(42) }]);

    client.destroy().await;
}

/// S6: `destroy()` purges every outstanding request unconditionally. The
/// mock node here never answers and never closes the connection either --
/// so the read loop's own "connection closed by peer" purge can't be what
/// resolves this callback; only `destroy()`'s unconditional purge can.
#[tokio::test]
async fn s6_destroy_purges_outstanding_requests() {
    let kv_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let kv_port = kv_listener.local_addr().unwrap().port();

    let client = connected_client(kv_port).await;
    let recorder = install_recording_callbacks(&client).await;

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let node = tokio::spawn(async move {
        let (stream, _buf) = accept_and_authenticate(&kv_listener).await;
        // Hold the connection open, answering nothing, until the test has
        // finished asserting on `destroy()`'s own purge.
        let _ = release_rx.await;
        drop(stream);
    });

    client.mget(vec![b"never-answered".to_vec()]).await.unwrap();

    client.destroy().await;
    client.execute().await;

    let records = recorder.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    match &records[0] {
        Record::Get { key, value } => {
            assert_eq!(key, b"never-answered");
            assert_eq!(*value, None);
        }
        other => panic!("expected a Get record, got {other:?}"),
    }

    let _ = release_tx.send(());
    node.await.unwrap();
}
