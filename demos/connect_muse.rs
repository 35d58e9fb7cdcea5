//! Muse sensor connection example
//!
//! Demonstrates the full link lifecycle:
//! - Scanning for a sensor named `muse_v3*`
//! - Connecting and subscribing to its characteristics
//! - Sending the default command frame
//! - Printing notifications for a while
//!
//! Run with: cargo run --example connect_muse
//!
//! To listen for longer:
//!   cargo run --example connect_muse -- --seconds 60
//!
//! To send a different command frame:
//!   cargo run --example connect_muse -- --frame 02-05-08-20-00-00-01

use muse_ble_link::{
    CharacteristicRole, CommandFrame, ConnectionState, DeviceManager, LinkConfig, LinkEvent,
    Result,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,muse_ble_link=debug".into()),
        )
        .init();

    println!("Muse v3 Link");
    println!("============\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let listen_for = args
        .iter()
        .position(|arg| arg == "--seconds")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(20));
    let frame = match args.iter().position(|arg| arg == "--frame") {
        Some(i) => args
            .get(i + 1)
            .map(String::as_str)
            .unwrap_or_default()
            .parse::<CommandFrame>()?,
        None => CommandFrame::default(),
    };

    let config = LinkConfig::default().with_scan_timeout(Duration::from_secs(30));
    let manager = DeviceManager::with_default_adapter(config).await?;

    let mut events = manager.subscribe_events();
    let mut status = manager.subscribe_status();

    let _status_printer = tokio::spawn(async move {
        while let Ok(state) = status.recv().await {
            println!("Status: {}", state);
        }
    });

    let _telemetry = manager.on_notification(CharacteristicRole::Data, |n| {
        println!("[data]    {} ({} bytes)", n.hex(), n.payload.len());
    });
    let _replies = manager.on_notification(CharacteristicRole::Command, |n| {
        println!("[command] {}", n.hex());
    });

    println!("Scanning for devices named '{}*'...\n", LinkConfig::default().name_token);
    manager.start_scan().await?;

    // Wait for the connection or a failure
    let connected = loop {
        match events.recv().await {
            Ok(LinkEvent::DeviceMatched(identity)) => println!("Found {}", identity),
            Ok(LinkEvent::DeviceConnected(identity)) => {
                println!("Connected to {}\n", identity);
                break true;
            }
            Ok(LinkEvent::Failure { kind, message }) => {
                println!("{} failure: {}", kind, message);
                // Let the attempt settle before deciding whether it is over
                tokio::time::sleep(Duration::from_millis(100)).await;
                let idle = !manager.is_scanning() && !manager.connection().is_attempting();
                if idle && manager.connected_device().is_none() {
                    break false;
                }
            }
            Ok(_) => {}
            Err(e) => {
                println!("Event stream ended: {}", e);
                break false;
            }
        }
    };

    if connected {
        println!("Sending {}", frame);
        manager.send_command(frame).await?;
        manager.begin_streaming()?;

        println!("Listening for {} seconds...\n", listen_for.as_secs());
        tokio::time::sleep(listen_for).await;

        if manager.status() == ConnectionState::Streaming {
            manager.end_streaming()?;
        }
    } else {
        println!("No sensor connected");
    }

    manager.shutdown().await?;
    println!("\nDone");

    Ok(())
}
