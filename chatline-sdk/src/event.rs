//! Events dispatched by the client to waiters and listeners.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::reply::ReplyCode;

/// The closed set of event names the bus routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Every decoded line, before classification.
    Raw,
    /// A numeric server reply.
    ServerReply,
    /// A PRIVMSG from a user.
    Message,
    /// A PING from the server.
    Ping,
    /// The receive loop has ended.
    Disconnected,
}

/// An event and its payload.
#[derive(Debug, Clone)]
pub enum Event {
    Raw(String),
    ServerReply(ServerReply),
    Message(UserMessage),
    Ping(PingNotice),
    Disconnected { reason: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Raw(_) => EventKind::Raw,
            Event::ServerReply(_) => EventKind::ServerReply,
            Event::Message(_) => EventKind::Message,
            Event::Ping(_) => EventKind::Ping,
            Event::Disconnected { .. } => EventKind::Disconnected,
        }
    }

    pub fn as_server_reply(&self) -> Option<&ServerReply> {
        match self {
            Event::ServerReply(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&UserMessage> {
        match self {
            Event::Message(msg) => Some(msg),
            _ => None,
        }
    }

    /// True if this is a server reply carrying `code`.
    pub fn is_reply(&self, code: ReplyCode) -> bool {
        self.as_server_reply().is_some_and(|r| r.code == code)
    }
}

/// A numbered reply: `:<prefix> <code> <user> [<args>] :<params>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReply {
    pub prefix: String,
    pub code: ReplyCode,
    /// The target nick the reply is addressed to.
    pub user: String,
    /// Middle parameters between the user and the trailing field, space-joined.
    pub args: Option<String>,
    /// The trailing field.
    pub params: String,
}

impl ServerReply {
    /// True if `token` appears among the middle args, e.g. the channel of a
    /// `353 me = #chan :a b c` reply.
    pub fn args_contain(&self, token: &str) -> bool {
        self.args
            .as_deref()
            .is_some_and(|args| args.split(' ').any(|a| a.eq_ignore_ascii_case(token)))
    }
}

impl fmt::Display for ServerReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{} {} {} ", self.prefix, self.code, self.user)?;
        if let Some(ref args) = self.args {
            write!(f, "{args} ")?;
        }
        write!(f, ":{}", self.params)
    }
}

/// `:<nick>!<username>@<host> PRIVMSG <channel> :<body>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub nick: String,
    pub username: String,
    pub host: String,
    /// Channel name, or our own nick for a direct message. Never empty.
    pub channel: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub(crate) channel_prefix: char,
}

impl UserMessage {
    /// A message not addressed to a channel.
    pub fn is_private(&self) -> bool {
        !self.channel.starts_with(self.channel_prefix)
    }
}

/// The token a server expects echoed back in PONG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingNotice {
    pub server_token: String,
}
