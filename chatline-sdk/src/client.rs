//! Connection controller.
//!
//! Owns the socket, runs the receive loop that feeds the [`EventBus`], drives
//! the NICK/USER handshake and exposes join / send / close as compositions of
//! the line codec and the bus wait primitives.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Ready -> Closing -> Closed
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::bus::{EventBus, Listener};
use crate::channel::Channel;
use crate::codec::{Command, LineReader, LineWriter};
use crate::config::{ClientConfig, Credentials, Resolved};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::parser::Parser;
use crate::reply::ReplyCode;

/// Default plaintext port.
pub const DEFAULT_PORT: u16 = 6667;

/// Where a client is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Closing,
    Closed,
}

struct Shared {
    config: ClientConfig,
    parser: Parser,
    bus: Arc<EventBus>,
    writer: Arc<LineWriter>,
    state: Mutex<ConnectionState>,
    channels: Mutex<HashMap<String, Channel>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state();
        tracing::debug!(from = ?*state, to = ?next, "Connection state");
        *state = next;
    }

    /// Move from `from` to `to`. Fails, leaving the state alone, if the
    /// client is no longer in `from`.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state();
        if *state != from {
            tracing::debug!(expected = ?from, actual = ?*state, "Skipped transition to {to:?}");
            return false;
        }
        tracing::debug!(from = ?from, to = ?to, "Connection state");
        *state = to;
        true
    }

    fn take_receive_task(&self) -> Option<JoinHandle<()>> {
        self.receive_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A client for one server connection. Cheap to clone; clones share the
/// connection.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let writer = Arc::new(LineWriter::new());

        // Answer PINGs in every state, independent of user listeners.
        let pong_writer = writer.clone();
        bus.set_builtin(EventKind::Ping, move |event| {
            let writer = pong_writer.clone();
            async move {
                let Event::Ping(ping) = event else { return };
                tracing::debug!(token = %ping.server_token, "Answering PING");
                if let Err(e) = writer.send(&Command::Pong(ping.server_token)).await {
                    tracing::warn!("Failed to answer PING: {e}");
                }
            }
        });

        Self {
            shared: Arc::new(Shared {
                parser: Parser::new(config.channel_prefix),
                config,
                bus,
                writer,
                state: Mutex::new(ConnectionState::Disconnected),
                channels: Mutex::new(HashMap::new()),
                receive_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state()
    }

    /// The bus inbound events are dispatched on.
    pub fn events(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Open a TCP connection to `host:port` and log in.
    ///
    /// Credentials missing from both `overrides` and the stored config fail
    /// with [`Error::Configuration`] before any I/O. If the welcome reply does
    /// not arrive within the login timeout this returns [`Error::Timeout`]
    /// and leaves the connection open; call [`close`](Client::close).
    pub async fn connect(&self, host: &str, port: u16, overrides: Credentials) -> Result<()> {
        let creds = overrides.resolve(&self.shared.config)?;
        self.begin_connecting()?;

        tracing::info!("Connecting to {host}:{port}");
        let tcp = match TcpStream::connect((host, port)).await {
            Ok(tcp) => tcp,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };
        self.login(tcp, creds).await
    }

    /// Log in over an already-open duplex stream.
    pub async fn connect_with_stream<S>(&self, stream: S, overrides: Credentials) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let creds = overrides.resolve(&self.shared.config)?;
        self.begin_connecting()?;
        self.login(stream, creds).await
    }

    fn begin_connecting(&self) -> Result<()> {
        let mut state = self.shared.state();
        match *state {
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connecting;
                Ok(())
            }
            ConnectionState::Closing | ConnectionState::Closed => Err(Error::ConnectionClosed),
            _ => Err(Error::AlreadyConnected),
        }
    }

    async fn login<S>(&self, stream: S, creds: Resolved) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let shared = &self.shared;
        let (reader, writer) = tokio::io::split(stream);
        shared.writer.attach(Box::new(writer)).await;

        // The loop must be reading before anything is sent.
        let task = tokio::spawn(receive_loop(
            LineReader::new(BufReader::new(reader)),
            shared.clone(),
        ));
        *shared
            .receive_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        let welcome = match shared.bus.register_wait(EventKind::ServerReply, |e| {
            e.is_reply(ReplyCode::RPL_WELCOME)
        }) {
            Ok(welcome) => welcome,
            Err(e) => {
                self.abandon().await;
                return Err(e);
            }
        };

        let handshake = async {
            shared.writer.send(&Command::Nick(creds.nick.clone())).await?;
            shared
                .writer
                .send(&Command::User {
                    username: creds.username.clone(),
                    password: creds.password.clone(),
                })
                .await
        };
        if let Err(e) = handshake.await {
            drop(welcome);
            self.abandon().await;
            return Err(e);
        }
        if !shared.transition(ConnectionState::Connecting, ConnectionState::Authenticating) {
            drop(welcome);
            self.abandon().await;
            return Err(Error::ConnectionClosed);
        }

        if let Err(e) = welcome.wait(shared.config.login_timeout).await {
            tracing::warn!(nick = %creds.nick, "Login failed: {e}");
            return Err(e);
        }

        // The server may have hung up right after the welcome.
        if !shared.transition(ConnectionState::Authenticating, ConnectionState::Ready) {
            self.abandon().await;
            return Err(Error::ConnectionClosed);
        }
        tracing::info!(nick = %creds.nick, "Logged in as {}", creds.username);
        Ok(())
    }

    /// Tear down a login that lost the race with `close` or a server hangup.
    async fn abandon(&self) {
        let shared = &self.shared;
        if let Some(task) = shared.take_receive_task() {
            task.abort();
        }
        if let Err(e) = shared.writer.shutdown().await {
            tracing::debug!("Writer shutdown: {e}");
        }
        shared.bus.close();
        let mut state = shared.state();
        if *state != ConnectionState::Closing {
            *state = ConnectionState::Closed;
        }
    }

    /// Send NICK.
    pub async fn set_nick(&self, nick: &str) -> Result<()> {
        self.send(Command::Nick(nick.to_string())).await
    }

    /// Join `name` and wait for the server's names listing.
    ///
    /// Members are taken from every `RPL_NAMREPLY` for the channel, in
    /// arrival order, until `RPL_ENDOFNAMES`. The resulting [`Channel`] is
    /// stored and can be fetched again with [`get_channel`](Client::get_channel).
    pub async fn join_channel(&self, name: &str) -> Result<Channel> {
        let shared = &self.shared;
        let listing = shared.bus.subscribe(EventKind::ServerReply)?;
        self.send(Command::Join(name.to_string())).await?;

        let replies = listing
            .accumulate(
                |e| {
                    e.as_server_reply().is_some_and(|r| {
                        matches!(r.code, ReplyCode::RPL_NAMREPLY | ReplyCode::RPL_TOPIC)
                            && r.args_contain(name)
                    })
                },
                |e| {
                    e.as_server_reply().is_some_and(|r| {
                        r.code == ReplyCode::RPL_ENDOFNAMES && r.args_contain(name)
                    })
                },
                shared.config.join_timeout,
            )
            .await?;

        let mut members = Vec::new();
        let mut description = None;
        for reply in replies.iter().filter_map(Event::as_server_reply) {
            match reply.code {
                ReplyCode::RPL_NAMREPLY => {
                    members.extend(reply.params.split_whitespace().map(str::to_string));
                }
                ReplyCode::RPL_TOPIC => description = Some(reply.params.clone()),
                _ => {}
            }
        }

        let channel = Channel::new(
            name,
            description,
            members,
            shared.config.channel_prefix,
            shared.writer.clone(),
        );
        tracing::info!(channel = %name, members = channel.member_count(), "Joined channel");
        shared.channels().insert(name.to_string(), channel.clone());
        Ok(channel)
    }

    pub fn get_channel(&self, name: &str) -> Option<Channel> {
        self.shared.channels().get(name).cloned()
    }

    /// Send a PRIVMSG. Delivery is not acknowledged by the protocol.
    pub async fn send_message(&self, target: &str, body: &str) -> Result<()> {
        self.send(Command::Privmsg {
            target: target.to_string(),
            text: body.to_string(),
        })
        .await
    }

    async fn send(&self, command: Command) -> Result<()> {
        if matches!(self.state(), ConnectionState::Closing | ConnectionState::Closed) {
            return Err(Error::ConnectionClosed);
        }
        self.shared.writer.send(&command).await
    }

    pub fn register_listener(&self, kind: EventKind, listener: &Listener) -> bool {
        self.shared.bus.register_listener(kind, listener)
    }

    pub fn remove_listener(&self, kind: EventKind, listener: &Listener) -> bool {
        self.shared.bus.remove_listener(kind, listener)
    }

    /// See [`EventBus::wait_for`].
    pub async fn wait_for<P>(&self, kind: EventKind, predicate: P, limit: Duration) -> Result<Event>
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.shared.bus.wait_for(kind, predicate, limit).await
    }

    /// See [`EventBus::accumulate`].
    pub async fn accumulate<M, T>(
        &self,
        kind: EventKind,
        matches: M,
        terminal: T,
        limit: Duration,
    ) -> Result<Vec<Event>>
    where
        M: Fn(&Event) -> bool,
        T: Fn(&Event) -> bool,
    {
        self.shared.bus.accumulate(kind, matches, terminal, limit).await
    }

    /// Send QUIT, stop the receive loop and close the stream.
    ///
    /// Outstanding waits fail with [`Error::ConnectionClosed`]. Closing an
    /// already closed client is a no-op.
    pub async fn close(&self, reason: Option<&str>) -> Result<()> {
        let shared = &self.shared;
        {
            let mut state = shared.state();
            match *state {
                ConnectionState::Closing | ConnectionState::Closed => return Ok(()),
                _ => *state = ConnectionState::Closing,
            }
        }

        if let Err(e) = shared.writer.send(&Command::Quit(reason.map(str::to_string))).await {
            tracing::debug!("QUIT not sent: {e}");
        }

        let task = shared.take_receive_task();
        let still_running = match task {
            Some(task) => {
                let running = !task.is_finished();
                task.abort();
                let _ = task.await;
                running
            }
            None => false,
        };

        let shutdown = shared.writer.shutdown().await;
        if still_running {
            shared
                .bus
                .dispatch(Event::Disconnected {
                    reason: reason.unwrap_or("closed by client").to_string(),
                })
                .await;
        }
        shared.bus.close();
        shared.channels().clear();
        shared.set_state(ConnectionState::Closed);
        tracing::info!("Connection closed");
        shutdown
    }
}

/// Read, classify and dispatch lines in arrival order until the stream ends.
async fn receive_loop<R>(mut lines: LineReader<R>, shared: Arc<Shared>)
where
    R: AsyncBufRead + Unpin,
{
    let bus = &shared.bus;
    let reason = loop {
        match lines.read_line().await {
            Ok(Some(line)) => {
                tracing::debug!("<- {line}");
                bus.dispatch(Event::Raw(line.clone())).await;
                match shared.parser.parse(&line) {
                    Ok(event) => bus.dispatch(event).await,
                    Err(e) => tracing::debug!("Dropped line: {e}"),
                }
            }
            Ok(None) => break "EOF".to_string(),
            Err(Error::Framing(e)) => tracing::warn!("Dropped line: {e}"),
            Err(e) => break e.to_string(),
        }
    };

    tracing::info!(%reason, "Receive loop ended");
    bus.dispatch(Event::Disconnected { reason }).await;
    bus.close();
    if let Err(e) = shared.writer.shutdown().await {
        tracing::debug!("Writer shutdown: {e}");
    }
    shared.set_state(ConnectionState::Closed);
}
