//! End-to-end command dispatch: pipelining, ordering, lifecycle.

mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use riptide::{Client, RedisError, Reply};
use support::{MockEngine, RespServer};
use tokio::time::timeout;

async fn connect(server: &RespServer) -> Client {
    Client::connect(server.host(), server.port())
        .await
        .expect("connect to in-process server")
}

#[tokio::test]
async fn test_ping() {
    let server = RespServer::start();
    let client = connect(&server).await;

    let reply = client.command(["PING"]).await.unwrap();
    assert_eq!(reply, Reply::Status("PONG".into()));
    assert!(client.ping().await.unwrap());

    client.close().await;
}

#[tokio::test]
async fn test_set_then_get() {
    let server = RespServer::start();
    let client = connect(&server).await;

    let set = client.command(["SET", "k", "v"]).await.unwrap();
    assert_eq!(set, Reply::Status("OK".into()));
    let get = client.command(["GET", "k"]).await.unwrap();
    assert_eq!(get, Reply::Data(b"v".to_vec()));

    client.close().await;
}

#[tokio::test]
async fn test_binary_safe_round_trip() {
    let server = RespServer::start();
    let client = connect(&server).await;

    let raw: &[u8] = b"\x00\r\n\x00";
    client
        .command([b"SET".as_slice(), b"bin".as_slice(), raw])
        .await
        .unwrap();
    let got = client.get("bin").await.unwrap();
    assert_eq!(got.as_deref(), Some(raw));

    client.close().await;
}

#[tokio::test]
async fn test_typed_helpers() {
    let server = RespServer::start();
    let client = connect(&server).await;

    client.set("n", b"41").await.unwrap();
    assert_eq!(client.incr("n").await.unwrap(), 42);
    assert!(client.exists("n").await.unwrap());
    assert_eq!(client.del("n").await.unwrap(), 1);
    assert!(!client.exists("n").await.unwrap());
    assert_eq!(client.get("n").await.unwrap(), None);
    assert_eq!(client.get_str("missing").await.unwrap(), None);

    client.close().await;
}

/// Commands issued in one scheduler turn are written as a single pipeline:
/// the engine sees exactly one flush.
#[tokio::test]
async fn test_pipeline_batches_into_one_flush() {
    let (engine, stats) = MockEngine::new(Box::new(|_| Some(Reply::Status("OK".into()))));
    let client = Client::with_engine(Box::new(engine)).unwrap();

    let pending: Vec<_> = (0..10_000)
        .map(|i| {
            client
                .send(["SET".to_string(), format!("k{}", i), "v".to_string()])
                .unwrap()
        })
        .collect();

    for p in pending {
        assert_eq!(p.await.unwrap(), Reply::Status("OK".into()));
    }

    assert_eq!(stats.submitted.load(Ordering::SeqCst), 10_000);
    assert_eq!(stats.on_write_calls.load(Ordering::SeqCst), 1);

    client.close().await;
}

/// Replies resolve in command submission order.
#[tokio::test]
async fn test_replies_in_submission_order() {
    let server = RespServer::start();
    let client = connect(&server).await;

    let pending: Vec<_> = (0..100)
        .map(|_| client.send(["INCR", "ordered"]).unwrap())
        .collect();

    for (i, p) in pending.into_iter().enumerate() {
        let reply = timeout(Duration::from_secs(5), p).await.unwrap().unwrap();
        assert_eq!(reply, Reply::Integer(i as i64 + 1));
    }

    client.close().await;
}

/// `close()` with a command still in flight fails its future and returns;
/// nothing hangs.
#[tokio::test]
async fn test_close_fails_inflight_command() {
    let server = RespServer::start();
    let client = connect(&server).await;

    let pending = client.send(["BLPOP", "empty", "0"]).unwrap();
    // Let the command reach the wire before closing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    timeout(Duration::from_secs(5), client.close())
        .await
        .expect("close must not hang");

    let result = timeout(Duration::from_secs(5), pending)
        .await
        .expect("pending future must resolve");
    assert!(matches!(result, Err(RedisError::Closed)));
}

/// `close()` releases the connection: the server observes the socket shut
/// down once close returns (allowing its accept thread scheduling slack).
#[tokio::test]
async fn test_close_releases_connection() {
    let server = RespServer::start();
    let client = connect(&server).await;

    assert!(client.ping().await.unwrap());
    assert_eq!(server.open_connections(), 1);

    client.close().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.open_connections() != 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "socket not released after close()"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let server = RespServer::start();
    let client = connect(&server).await;

    client.close().await;
    client.close().await;

    assert!(matches!(
        client.send(["PING"]),
        Err(RedisError::Closed)
    ));
    assert!(matches!(client.ping().await, Err(RedisError::Closed)));
}

#[tokio::test]
async fn test_empty_command_rejected() {
    let server = RespServer::start();
    let client = connect(&server).await;

    let result = client.send(Vec::<Vec<u8>>::new());
    assert!(matches!(result, Err(RedisError::InvalidCommand(_))));

    client.close().await;
}

#[tokio::test]
async fn test_server_error_surfaces_as_redis_error() {
    let server = RespServer::start();
    let client = connect(&server).await;

    let result = client.command(["NOSUCHCOMMAND"]).await;
    match result {
        Err(RedisError::Redis(message)) => assert!(message.contains("unknown command")),
        other => panic!("expected Redis error, got {:?}", other),
    }

    client.close().await;
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = Client::connect("127.0.0.1", port).await;
    assert!(matches!(result, Err(RedisError::Connection(_))));
}

#[tokio::test]
async fn test_command_builder_execute() {
    let server = RespServer::start();
    let client = connect(&server).await;

    let cmd = riptide::Cmd::new("SET").arg("built").arg(b"value");
    assert_eq!(
        client.execute(&cmd).await.unwrap(),
        Reply::Status("OK".into())
    );
    assert_eq!(client.get("built").await.unwrap(), Some(b"value".to_vec()));

    client.close().await;
}

/// Dropping the client without close() still tears the poll thread down
/// and resolves outstanding futures.
#[tokio::test]
async fn test_drop_without_close_resolves_pending() {
    let server = RespServer::start();
    let client = connect(&server).await;

    let pending = client.send(["BLPOP", "empty", "0"]).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(client);

    let result = timeout(Duration::from_secs(5), pending)
        .await
        .expect("pending future must resolve after drop");
    assert!(result.is_err());
}
