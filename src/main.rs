//! Broadcast Socket Client - Terminal Demo
//!
//! Connects to a broadcast server, prints every message on the channel and
//! sends each line typed on stdin as `{"text": line}`.
//!
//! Commands: `/connect`, `/disconnect`, `/status`, `/quit`.

use std::env;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use broadcast_socket_client::{BroadcastClient, BroadcastMessage, ClientConfig, WsTransport};

/// Default server URL
const DEFAULT_SERVER_URL: &str = "http://localhost:12000";

/// Default channel
const DEFAULT_CHANNEL: &str = "home";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=broadcast_socket_client=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("broadcast_socket_client=info")),
        )
        .init();

    // Server URL and channel from command line or defaults
    let mut args = env::args().skip(1);
    let server_url = args
        .next()
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
    let channel = args.next().unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

    let (client, task) = BroadcastClient::spawn(WsTransport::new(), ClientConfig::default());

    // Print incoming messages
    let mut incoming = client.subscribe();
    tokio::spawn(async move {
        loop {
            match incoming.recv().await {
                Ok(message) => println!("{}", render(&message)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Display fell behind, skipped {} messages", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("Connecting to {} (channel '{}')", server_url, channel);
    client.connect(&server_url, channel.as_str()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/connect" => {
                client.connect(&server_url, channel.as_str()).await?;
            }
            "/disconnect" => {
                client.disconnect().await?;
                println!("Disconnected");
            }
            "/status" => {
                let state = client.snapshot();
                if state.is_connected() {
                    println!(
                        "Connected to {} ({} messages)",
                        channel,
                        state.messages.len()
                    );
                } else {
                    match state.last_error {
                        Some(e) => println!("Disconnected (last error: {})", e),
                        None => println!("Disconnected"),
                    }
                }
            }
            text => {
                if !client.is_connected() {
                    println!("Connect to send messages");
                    continue;
                }
                if let Err(e) = client.send_message(json!({ "text": text })).await {
                    println!("Message not sent: {}", e);
                }
            }
        }
    }

    client.disconnect().await?;
    drop(client);
    task.await?;

    Ok(())
}

/// One display line per message: `[HH:MM:SS] sender: data`
fn render(message: &BroadcastMessage) -> String {
    let data = serde_json::to_string_pretty(&message.data)
        .unwrap_or_else(|_| message.data.to_string());
    format!(
        "[{}] {}: {}",
        message.local_time(),
        message.sender_label(),
        data
    )
}
