/// A thin command-line front end over `vbucket_kv_core::Client`, standing in
/// for the source's CLI demux. No argument-parsing crate: a straightforward
/// hand-rolled table over `std::env::args`, per the option-table-indexed-by-
/// letter note the core's design carries forward.
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use vbucket_kv_core::client::{Callbacks, ClientOptions};
use vbucket_kv_core::{Client, StorageOpType};

fn usage() -> &'static str {
    "usage: kv-cli --host <host> --port <port> --bucket <bucket> [--user <u> --pass <p>] <command> [args...]\n\
     commands:\n\
     \x20 get <key>\n\
     \x20 set <key> <value>\n\
     \x20 rm <key>\n\
     \x20 incr <key> <delta> [initial]"
}

struct Args {
    host: String,
    port: u16,
    bucket: String,
    user: Option<String>,
    pass: Option<String>,
    command: String,
    rest: Vec<String>,
}

fn parse_args() -> Option<Args> {
    let mut host = "127.0.0.1".to_string();
    let mut port = 8091u16;
    let mut bucket = "default".to_string();
    let mut user = None;
    let mut pass = None;

    let mut argv: Vec<String> = env::args().skip(1).collect();
    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "--host" => {
                host = argv.get(i + 1)?.clone();
                argv.drain(i..=i + 1);
            }
            "--port" => {
                port = argv.get(i + 1)?.parse().ok()?;
                argv.drain(i..=i + 1);
            }
            "--bucket" => {
                bucket = argv.get(i + 1)?.clone();
                argv.drain(i..=i + 1);
            }
            "--user" => {
                user = Some(argv.get(i + 1)?.clone());
                argv.drain(i..=i + 1);
            }
            "--pass" => {
                pass = Some(argv.get(i + 1)?.clone());
                argv.drain(i..=i + 1);
            }
            _ => i += 1,
        }
    }

    if argv.is_empty() {
        return None;
    }
    let command = argv.remove(0);

    Some(Args {
        host,
        port,
        bucket,
        user,
        pass,
        command,
        rest: argv,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args() {
        Some(args) => args,
        None => {
            eprintln!("{}", usage());
            return ExitCode::FAILURE;
        }
    };

    let mut options = ClientOptions::new(args.host, args.port, args.bucket);
    if let (Some(user), Some(pass)) = (args.user, args.pass) {
        options = options.credentials(user, pass);
    }

    let client = Client::create(options);
    if let Err(e) = client.connect().await {
        eprintln!("failed to connect: {e}");
        return ExitCode::FAILURE;
    }

    install_printing_callbacks(&client).await;

    let result = run_command(&client, &args.command, &args.rest).await;
    client.execute().await;
    client.destroy().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}\n{}", usage());
            ExitCode::FAILURE
        }
    }
}

async fn install_printing_callbacks(client: &Arc<Client>) {
    let callbacks = Callbacks {
        get: Some(Arc::new(|_client, key, result| {
            let key = String::from_utf8_lossy(key);
            match result {
                Ok(payload) => println!("get {key} -> {}", String::from_utf8_lossy(&payload.value)),
                Err(e) => println!("get {key} -> error: {e}"),
            }
        })),
        store: Some(Arc::new(|_client, key, result| {
            let key = String::from_utf8_lossy(key);
            match result {
                Ok(cas) => println!("store {key} -> cas {cas}"),
                Err(e) => println!("store {key} -> error: {e}"),
            }
        })),
        arithmetic: Some(Arc::new(|_client, key, result| {
            let key = String::from_utf8_lossy(key);
            match result {
                Ok(payload) => println!("arithmetic {key} -> {}", payload.value),
                Err(e) => println!("arithmetic {key} -> error: {e}"),
            }
        })),
        remove: Some(Arc::new(|_client, key, result| {
            let key = String::from_utf8_lossy(key);
            match result {
                Ok(()) => println!("remove {key} -> ok"),
                Err(e) => println!("remove {key} -> error: {e}"),
            }
        })),
        tap: None,
        error: Some(Arc::new(|_client, err| eprintln!("async error: {err}"))),
    };
    client.set_callbacks(callbacks).await;
}

async fn run_command(client: &Arc<Client>, command: &str, rest: &[String]) -> Result<(), String> {
    match command {
        "get" => {
            let key = rest.first().ok_or("missing <key>")?.as_bytes().to_vec();
            client.mget(vec![key]).await.map_err(|e| e.to_string())
        }
        "set" => {
            let key = rest.first().ok_or("missing <key>")?.as_bytes().to_vec();
            let value = rest.get(1).ok_or("missing <value>")?.as_bytes().to_vec();
            client
                .store(StorageOpType::Set, key, value, 0, 0, 0)
                .await
                .map_err(|e| e.to_string())
        }
        "rm" => {
            let key = rest.first().ok_or("missing <key>")?.as_bytes().to_vec();
            client.remove(key, 0).await.map_err(|e| e.to_string())
        }
        "incr" => {
            let key = rest.first().ok_or("missing <key>")?.as_bytes().to_vec();
            let delta: i64 = rest
                .get(1)
                .ok_or("missing <delta>")?
                .parse()
                .map_err(|_| "delta must be an integer".to_string())?;
            let initial: u64 = rest
                .get(2)
                .map(|s| s.parse())
                .transpose()
                .map_err(|_| "initial must be an unsigned integer".to_string())?
                .unwrap_or(0);
            client
                .arithmetic(key, delta, initial, 0, true)
                .await
                .map_err(|e| e.to_string())
        }
        other => Err(format!("unknown command: {other}")),
    }
}
