//! Client configuration and connect-time credential overrides.

use std::time::Duration;

use crate::error::{Error, Result};

/// Stored defaults for a [`Client`](crate::client::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Nickname sent with NICK.
    pub nick: Option<String>,
    /// Username (ident) sent with USER.
    pub username: Option<String>,
    /// Sent as the trailing field of USER.
    pub password: Option<String>,
    /// Names starting with this character are channels; anything else is
    /// treated as a private target.
    pub channel_prefix: char,
    /// How long to wait for the welcome reply after NICK/USER.
    pub login_timeout: Duration,
    /// How long to wait for the end of the names listing after JOIN.
    pub join_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nick: None,
            username: None,
            password: None,
            channel_prefix: '#',
            login_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn new(nick: &str, username: &str, password: &str) -> Self {
        Self {
            nick: Some(nick.to_string()),
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..Default::default()
        }
    }

    pub fn with_channel_prefix(mut self, prefix: char) -> Self {
        self.channel_prefix = prefix;
        self
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }
}

/// Per-call overrides for `connect`. `None` falls back to the stored value.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub nick: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Credentials after applying overrides; every field is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolved {
    pub nick: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn nick(mut self, nick: &str) -> Self {
        self.nick = Some(nick.to_string());
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Call-time value if present, else the stored default, else an error.
    pub(crate) fn resolve(self, config: &ClientConfig) -> Result<Resolved> {
        fn pick(over: Option<String>, stored: &Option<String>, what: &str) -> Result<String> {
            over.or_else(|| stored.clone())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Configuration(format!("no {what} set")))
        }

        Ok(Resolved {
            nick: pick(self.nick, &config.nick, "nickname")?,
            username: pick(self.username, &config.username, "username")?,
            password: pick(self.password, &config.password, "password")?,
        })
    }
}
