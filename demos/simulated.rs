//! Example running the monitor against a simulated data source.
//!
//! This example shows how to:
//! - Script a data source that changes now and then
//! - Subscribe to pushed events in-process
//! - Read the latest event from the pull cache
//! - Shut the monitor down cleanly
//!
//! Run with: cargo run --example simulated

use pollwatch::notify::BroadcastSink;
use pollwatch::prelude::*;
use pollwatch::sources::MemorySource;
use pollwatch::store::MemoryStateStore;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Simulated Monitor Example ===\n");

    // Temperature reading that changes every third poll, with a gap
    let source = MemorySource::new();
    for (i, temp) in [20.5, 20.5, 20.5, 21.0, 21.0, 21.0, 22.5].into_iter().enumerate() {
        if i == 4 {
            source.push_empty();
        }
        source.push_record(
            Record::new()
                .with_field("sensor", "boiler-1")
                .with_field("temp", temp),
        );
    }

    let sink = BroadcastSink::new(16);
    let mut events = sink.subscribe();

    let monitor = Monitor::builder()
        .with_source(source)
        .with_sink(sink)
        .with_store(MemoryStateStore::new())
        .with_measurement("temperature")
        .with_topic("plant/boiler")
        .with_interval(Duration::from_millis(200))
        .build()?;

    println!("Pull cache before the first cycle:");
    println!("  {}\n", serde_json::to_string(&*monitor.latest())?);

    monitor.start()?;

    println!("Pushed events:");
    for _ in 0..8 {
        match events.recv().await {
            Ok(message) => println!(
                "  [{}] {}",
                message.topic,
                String::from_utf8_lossy(&message.payload)
            ),
            Err(e) => {
                println!("  subscriber error: {}", e);
                break;
            }
        }
    }

    println!("\nPull cache now:");
    println!("  {}", serde_json::to_string(&*monitor.latest())?);

    monitor.shutdown().await?;
    println!("\nMonitor {}", monitor.phase());

    println!("\n=== Example Complete ===");
    Ok(())
}
