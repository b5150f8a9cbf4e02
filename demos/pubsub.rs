//! Pub/sub walkthrough: dedicated subscription connection + publisher.
//!
//! Run with: cargo run --example pubsub
//!
//! Requires Redis running on localhost:6379.

use riptide::{Client, RedisResult};

#[tokio::main]
async fn main() -> RedisResult<()> {
    tracing_subscriber::fmt::init();

    println!("🔌 Connecting to Redis...");
    let publisher = Client::connect("127.0.0.1", 6379).await?;

    println!("📻 Subscribing to riptide:demo:events...");
    let mut sub = publisher.subscribe(&["riptide:demo:events"], &[]).await?;

    // Give the server a moment to register the subscription.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    println!("📣 Publishing 5 messages...");
    for i in 0..5 {
        let receivers = publisher
            .publish("riptide:demo:events", format!("event-{}", i).as_bytes())
            .await?;
        println!("   → event-{} ({} receiver)", i, receivers);
    }

    println!("📥 Receiving...");
    for _ in 0..5 {
        match sub.recv().await {
            Some(msg) => println!(
                "   ✅ [{}] {}",
                msg.channel,
                String::from_utf8_lossy(&msg.payload)
            ),
            None => break,
        }
    }

    sub.close().await;
    publisher.close().await;

    println!("\n🎉 Pub/sub demo complete");
    Ok(())
}
