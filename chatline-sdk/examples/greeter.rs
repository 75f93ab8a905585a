//! Greeter example for chatline.
//!
//! Connects, joins a channel, says hello, answers `!ping` for a while and
//! then quits.
//!
//! Usage:
//!   cargo run --example greeter -- --host irc.example.net --nick greeter \
//!       --password secret --channel "#test"

use std::time::Duration;

use anyhow::Result;
use chatline_sdk::bus::Listener;
use chatline_sdk::client::{Client, DEFAULT_PORT};
use chatline_sdk::config::{ClientConfig, Credentials};
use chatline_sdk::{Event, EventKind};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "greeter", about = "Join a channel and say hello")]
struct Args {
    /// Server host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Nickname
    #[arg(long, default_value = "greeter")]
    nick: String,

    /// Username (defaults to the nickname)
    #[arg(long)]
    username: Option<String>,

    /// Password sent with USER
    #[arg(long, env = "CHATLINE_PASSWORD")]
    password: String,

    /// Channel to join
    #[arg(long, default_value = "#test")]
    channel: String,

    /// Message to send after joining
    #[arg(long, default_value = "hello!")]
    message: String,

    /// Seconds to stay connected answering !ping
    #[arg(long, default_value_t = 30)]
    linger: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chatline_sdk=info".parse()?))
        .init();

    let args = Args::parse();
    let username = args.username.clone().unwrap_or_else(|| args.nick.clone());

    let client = Client::new(ClientConfig::new(&args.nick, &username, &args.password));
    client
        .connect(&args.host, args.port, Credentials::default())
        .await?;

    let channel = client.join_channel(&args.channel).await?;
    tracing::info!(
        channel = %channel.name,
        topic = ?channel.description,
        "Members: {}",
        channel.members.join(", ")
    );
    channel.send(&args.message).await?;

    let responder = client.clone();
    let on_message = Listener::new(move |event| {
        let client = responder.clone();
        async move {
            let Event::Message(msg) = event else { return };
            tracing::info!(from = %msg.nick, to = %msg.channel, "{}", msg.body);
            if msg.body.trim() == "!ping" {
                let target = if msg.is_private() { &msg.nick } else { &msg.channel };
                if let Err(e) = client.send_message(target, "pong").await {
                    tracing::warn!("Reply failed: {e}");
                }
            }
        }
    });
    client.register_listener(EventKind::Message, &on_message);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.linger)) => {}
        _ = tokio::signal::ctrl_c() => {}
        event = client.wait_for(EventKind::Disconnected, |_| true, Duration::from_secs(args.linger)) => {
            if let Ok(Event::Disconnected { reason }) = event {
                tracing::warn!("Server closed the connection: {reason}");
            }
        }
    }

    client.close(Some("goodbye")).await?;
    Ok(())
}
