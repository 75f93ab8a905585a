//! Chatline SDK
//!
//! An async client for line-oriented IRC-style chat servers. Inbound lines are
//! parsed into typed [`Event`](event::Event)s and dispatched on an
//! [`EventBus`](bus::EventBus), where callers can either listen persistently
//! or await a specific reply with [`wait_for`](bus::EventBus::wait_for) and
//! [`accumulate`](bus::EventBus::accumulate).
//!
//! # Modules
//!
//! - [`client`] — Connection controller: handshake, join, send, close
//! - [`bus`] — Event dispatch to waits, built-in handlers and listeners
//! - [`sync`] — Awaitable waits and accumulations over the bus
//! - [`parser`] — Line classification (PING, numeric reply, PRIVMSG)
//! - [`codec`] — Line framing and command encoding
//! - [`event`] — Event kinds and payloads
//! - [`reply`] — Numeric reply codes
//! - [`channel`] — Joined channels
//! - [`config`] — Client configuration and credentials
//! - [`error`] — Error type
//!
//! # Example
//!
//! ```rust,no_run
//! use chatline_sdk::client::{Client, DEFAULT_PORT};
//! use chatline_sdk::config::{ClientConfig, Credentials};
//!
//! # async fn run() -> chatline_sdk::error::Result<()> {
//! let client = Client::new(ClientConfig::new("alice", "alice", "secret"));
//! client.connect("irc.example.net", DEFAULT_PORT, Credentials::default()).await?;
//! let channel = client.join_channel("#rust").await?;
//! channel.send("hello everyone").await?;
//! client.close(Some("bye")).await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod parser;
pub mod reply;
pub mod sync;

pub use client::{Client, ConnectionState};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
