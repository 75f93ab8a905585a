//! A joined channel: a snapshot of its members taken at join time.

use std::fmt;
use std::sync::Arc;

use crate::codec::{Command, LineWriter};
use crate::error::Result;

/// A channel the client has joined.
///
/// The member list is the names listing received on join; it is not kept
/// live afterwards.
#[derive(Clone)]
pub struct Channel {
    pub name: String,
    /// Topic received with the join, if the server sent one.
    pub description: Option<String>,
    /// Members in the order the server listed them.
    pub members: Vec<String>,
    channel_prefix: char,
    writer: Arc<LineWriter>,
}

impl Channel {
    pub(crate) fn new(
        name: &str,
        description: Option<String>,
        members: Vec<String>,
        channel_prefix: char,
        writer: Arc<LineWriter>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description,
            members,
            channel_prefix,
            writer,
        }
    }

    /// True if the name does not carry the channel prefix.
    pub fn is_private(&self) -> bool {
        !self.name.starts_with(self.channel_prefix)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Send a PRIVMSG to this channel. No acknowledgement is awaited.
    pub async fn send(&self, body: &str) -> Result<()> {
        self.writer
            .send(&Command::Privmsg {
                target: self.name.clone(),
                text: body.to_string(),
            })
            .await
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("member_count", &self.member_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::LineReader;
    use tokio::io::BufReader;

    fn channel(name: &str, writer: Arc<LineWriter>) -> Channel {
        Channel::new(name, None, vec!["a".into(), "b".into()], '#', writer)
    }

    #[test]
    fn derived_properties() {
        let writer = Arc::new(LineWriter::new());
        let chan = channel("#rust", writer.clone());
        assert!(!chan.is_private());
        assert_eq!(chan.member_count(), 2);
        assert!(channel("alice", writer).is_private());
    }

    #[tokio::test]
    async fn send_writes_privmsg() {
        let (client, server) = tokio::io::duplex(256);
        let writer = Arc::new(LineWriter::new());
        writer.attach(Box::new(client)).await;

        channel("#rust", writer).send("hello all").await.unwrap();

        let mut reader = LineReader::new(BufReader::new(server));
        assert_eq!(
            reader.read_line().await.unwrap().as_deref(),
            Some("PRIVMSG #rust :hello all")
        );
    }
}
