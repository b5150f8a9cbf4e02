//! Pipelining walkthrough for the riptide client.
//!
//! Run with: cargo run --example pipeline
//!
//! Requires Redis running on localhost:6379:
//!   docker run -d -p 6379:6379 redis:7-alpine

use std::time::Instant;

use riptide::{Client, RedisResult};

#[tokio::main]
async fn main() -> RedisResult<()> {
    tracing_subscriber::fmt::init();

    println!("🔌 Connecting to Redis...");
    let client = Client::connect("127.0.0.1", 6379).await?;

    println!("📡 PING...");
    assert!(client.ping().await?, "PING should return PONG");
    println!("   ✅ PONG received");

    println!("📝 SET/GET...");
    client.set("riptide:demo:hello", b"world").await?;
    let value = client.get_str("riptide:demo:hello").await?;
    assert_eq!(value.as_deref(), Some("world"));
    println!("   ✅ SET/GET works");

    // Everything issued before the first await goes out as one pipelined
    // write; the poll thread wakes exactly once for the whole batch.
    println!("🚀 Pipelining 10,000 INCRs...");
    client.del("riptide:demo:counter").await?;
    let start = Instant::now();
    let pending: Vec<_> = (0..10_000)
        .map(|_| client.send(["INCR", "riptide:demo:counter"]))
        .collect::<RedisResult<_>>()?;
    let mut last = 0;
    for p in pending {
        last = p.await?.as_int().unwrap_or(0);
    }
    let elapsed = start.elapsed();
    assert_eq!(last, 10_000);
    println!(
        "   ✅ 10,000 commands in {:.1?} ({:.0} cmd/s)",
        elapsed,
        10_000.0 / elapsed.as_secs_f64()
    );

    client.del("riptide:demo:hello").await?;
    client.del("riptide:demo:counter").await?;
    client.close().await;

    println!("\n🎉 Pipeline demo complete");
    Ok(())
}
