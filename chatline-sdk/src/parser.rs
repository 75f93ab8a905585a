//! Classifies decoded lines into typed messages.
//!
//! Grammars are tried in a fixed order (PING, numeric reply, PRIVMSG) and
//! the first match wins.

use chrono::Utc;

use crate::error::{Error, Result};
use crate::event::{Event, PingNotice, ServerReply, UserMessage};
use crate::reply::ReplyCode;

/// Result of classifying one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Reply(ServerReply),
    Message(UserMessage),
    Ping(PingNotice),
    /// No grammar matched; carries a short reason for the log.
    Unrecognized(&'static str),
}

impl Classified {
    pub fn into_event(self) -> Option<Event> {
        match self {
            Classified::Reply(reply) => Some(Event::ServerReply(reply)),
            Classified::Message(msg) => Some(Event::Message(msg)),
            Classified::Ping(ping) => Some(Event::Ping(ping)),
            Classified::Unrecognized(_) => None,
        }
    }
}

/// A line split into prefix, command and parameters, borrowing from the input.
struct Tokens<'a> {
    prefix: Option<&'a str>,
    command: &'a str,
    params: Vec<&'a str>,
}

impl<'a> Tokens<'a> {
    fn split(line: &'a str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        // IRCv3 tags are tolerated but not interpreted.
        if rest.starts_with('@') {
            rest = rest.split_once(' ')?.1;
        }

        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (pfx, tail) = stripped.split_once(' ')?;
                rest = tail;
                Some(pfx)
            }
            None => None,
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing);
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    if !param.is_empty() {
                        params.push(param);
                    }
                    rest = tail;
                }
                None => {
                    params.push(rest);
                    break;
                }
            }
        }

        Some(Tokens {
            prefix,
            command,
            params,
        })
    }
}

/// Stateless classifier; the channel prefix decides what counts as private.
#[derive(Debug, Clone, Copy)]
pub struct Parser {
    channel_prefix: char,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new('#')
    }
}

impl Parser {
    pub fn new(channel_prefix: char) -> Self {
        Self { channel_prefix }
    }

    pub fn classify(&self, line: &str) -> Classified {
        let Some(tokens) = Tokens::split(line) else {
            return Classified::Unrecognized("malformed line");
        };

        if let Some(ping) = parse_ping(&tokens) {
            return Classified::Ping(ping);
        }
        match parse_reply(&tokens) {
            Ok(Some(reply)) => return Classified::Reply(reply),
            Err(reason) => return Classified::Unrecognized(reason),
            Ok(None) => {}
        }
        if let Some(msg) = self.parse_privmsg(&tokens) {
            return Classified::Message(msg);
        }
        Classified::Unrecognized("no grammar matched")
    }

    /// Classify `line` into an [`Event`], or [`Error::Parse`] if no grammar
    /// matched.
    pub fn parse(&self, line: &str) -> Result<Event> {
        match self.classify(line) {
            Classified::Unrecognized(why) => Err(Error::Parse(format!("{why}: {line}"))),
            classified => classified.into_event().ok_or_else(|| Error::Parse(line.to_string())),
        }
    }

    fn parse_privmsg(&self, tokens: &Tokens<'_>) -> Option<UserMessage> {
        if !tokens.command.eq_ignore_ascii_case("PRIVMSG") || tokens.params.len() != 2 {
            return None;
        }
        let (nick, userhost) = tokens.prefix?.split_once('!')?;
        let (username, host) = userhost.split_once('@')?;
        let channel = tokens.params[0];
        if [nick, username, host, channel].iter().any(|s| s.is_empty()) {
            return None;
        }

        Some(UserMessage {
            nick: nick.to_string(),
            username: username.to_string(),
            host: host.to_string(),
            channel: channel.to_string(),
            body: tokens.params[1].to_string(),
            received_at: Utc::now(),
            channel_prefix: self.channel_prefix,
        })
    }
}

fn parse_ping(tokens: &Tokens<'_>) -> Option<PingNotice> {
    if !tokens.command.eq_ignore_ascii_case("PING") {
        return None;
    }
    let token = tokens.params.first().filter(|t| !t.is_empty())?;
    Some(PingNotice {
        server_token: token.to_string(),
    })
}

/// `Ok(None)` if the line is not numeric at all; `Err` if it is numeric but
/// the code is unknown, so it must not fall through to the PRIVMSG grammar.
fn parse_reply(tokens: &Tokens<'_>) -> std::result::Result<Option<ServerReply>, &'static str> {
    let command = tokens.command;
    if command.len() != 3 || !command.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    let Some(prefix) = tokens.prefix.filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    if tokens.params.len() < 2 {
        return Ok(None);
    }

    let code = command
        .parse::<u16>()
        .ok()
        .and_then(ReplyCode::from_code)
        .ok_or("unknown reply code")?;

    let (params, middle) = tokens.params.split_last().ok_or("missing params")?;
    let (user, args) = middle.split_first().ok_or("missing user")?;

    Ok(Some(ServerReply {
        prefix: prefix.to_string(),
        code,
        user: user.to_string(),
        args: if args.is_empty() { None } else { Some(args.join(" ")) },
        params: params.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(line: &str) -> Classified {
        Parser::default().classify(line)
    }

    fn reply(line: &str) -> ServerReply {
        match classify(line) {
            Classified::Reply(r) => r,
            other => panic!("expected reply for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn ping_with_trailing_token() {
        assert_eq!(
            classify("PING :abc123\r\n"),
            Classified::Ping(PingNotice {
                server_token: "abc123".into()
            })
        );
    }

    #[test]
    fn ping_wins_even_with_prefix() {
        assert!(matches!(classify(":irc.example.net PING :tok"), Classified::Ping(_)));
    }

    #[test]
    fn welcome_reply() {
        let r = reply(":irc.example.net 001 alice :Welcome to the network alice");
        assert_eq!(r.prefix, "irc.example.net");
        assert_eq!(r.code, ReplyCode::RPL_WELCOME);
        assert_eq!(r.user, "alice");
        assert_eq!(r.args, None);
        assert_eq!(r.params, "Welcome to the network alice");
    }

    #[test]
    fn names_reply_keeps_middle_args() {
        let r = reply(":irc.example.net 353 alice = #rust :alice @bob +carol");
        assert_eq!(r.code, ReplyCode::RPL_NAMREPLY);
        assert_eq!(r.args.as_deref(), Some("= #rust"));
        assert_eq!(r.params, "alice @bob +carol");
    }

    #[test]
    fn reply_round_trips_through_display() {
        for line in [
            ":irc.example.net 001 alice :Welcome home",
            ":irc.example.net 353 alice = #rust :a b c",
            ":irc.example.net 366 alice #rust :End of /NAMES list.",
        ] {
            let r = reply(line);
            assert_eq!(r.to_string(), line);
            assert_eq!(reply(&r.to_string()), r);
        }
    }

    #[test]
    fn unknown_numeric_is_unrecognized_not_a_message() {
        assert_eq!(
            classify(":irc.example.net 999 alice :mystery"),
            Classified::Unrecognized("unknown reply code")
        );
    }

    #[test]
    fn privmsg_to_channel() {
        let Classified::Message(msg) = classify(":bob!bobby@host.example PRIVMSG #rust :hi there")
        else {
            panic!("expected message");
        };
        assert_eq!(msg.nick, "bob");
        assert_eq!(msg.username, "bobby");
        assert_eq!(msg.host, "host.example");
        assert_eq!(msg.channel, "#rust");
        assert_eq!(msg.body, "hi there");
        assert!(!msg.is_private());
    }

    #[test]
    fn privmsg_direct_is_private() {
        let Classified::Message(msg) = classify(":bob!b@h PRIVMSG alice :psst") else {
            panic!("expected message");
        };
        assert!(msg.is_private());
    }

    #[test]
    fn configured_prefix_changes_privacy() {
        let Classified::Message(msg) = Parser::new('&').classify(":bob!b@h PRIVMSG #rust :x") else {
            panic!("expected message");
        };
        assert!(msg.is_private());
    }

    #[test]
    fn unmatched_lines_are_unrecognized() {
        for line in [
            "",
            ":only-prefix",
            ":srv NOTICE * :Looking up your hostname",
            ":bob PRIVMSG #rust :no userhost",
            "JOIN #rust",
        ] {
            assert!(
                matches!(classify(line), Classified::Unrecognized(_)),
                "{line:?} should be unrecognized"
            );
        }
    }

    #[test]
    fn parse_reports_unrecognized_as_error() {
        let parser = Parser::default();
        assert!(matches!(parser.parse("PING :x"), Ok(Event::Ping(_))));
        let err = parser.parse(":srv 999 me :what").unwrap_err();
        assert!(matches!(err, Error::Parse(ref m) if m.starts_with("unknown reply code")));
    }

    #[test]
    fn tags_are_skipped() {
        let Classified::Message(msg) =
            classify("@time=2024-01-01T00:00:00Z :bob!b@h PRIVMSG #rust :tagged")
        else {
            panic!("expected message");
        };
        assert_eq!(msg.body, "tagged");
    }
}
