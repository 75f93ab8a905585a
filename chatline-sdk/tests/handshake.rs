//! Integration tests: client against a scripted server over real TCP.

use std::time::Duration;

use chatline_sdk::bus::Listener;
use chatline_sdk::client::{Client, ConnectionState};
use chatline_sdk::config::{ClientConfig, Credentials};
use chatline_sdk::reply::ReplyCode;
use chatline_sdk::{Error, Event, EventKind};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// The accepted server side of one client connection.
struct ScriptedServer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ScriptedServer {
    /// Read the next line the client sent, raw, including CRLF.
    async fn expect_line(&mut self, description: &str) -> String {
        let mut line = String::new();
        match timeout(Duration::from_secs(2), self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) => panic!("Connection closed while waiting for: {description}"),
            Ok(Ok(_)) => line,
            Ok(Err(e)) => panic!("Read error while waiting for {description}: {e}"),
            Err(_) => panic!("Timeout waiting for: {description}"),
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }
}

/// Helper: bind a listener on a random port and connect a client to it.
async fn connect_client(config: ClientConfig) -> (Client, ScriptedServer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = Client::new(config);
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .connect("127.0.0.1", port, Credentials::default())
                .await
        })
    };

    let (stream, _) = listener.accept().await.unwrap();
    let (read, write) = stream.into_split();
    let mut server = ScriptedServer {
        reader: BufReader::new(read),
        writer: write,
    };

    assert_eq!(server.expect_line("NICK").await, "NICK tester\r\n");
    assert_eq!(server.expect_line("USER").await, "USER tester * * :hunter2\r\n");
    server
        .send(":irc.example.net 001 tester :Welcome to the test network tester")
        .await;
    connecting.await.unwrap().unwrap();

    (client, server)
}

fn config() -> ClientConfig {
    ClientConfig::new("tester", "tester", "hunter2")
        .with_login_timeout(Duration::from_secs(2))
        .with_join_timeout(Duration::from_secs(2))
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_then_ready() {
    let (client, _server) = connect_client(config()).await;
    assert_eq!(client.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn missing_password_fails_before_connecting() {
    let client = Client::new(ClientConfig {
        nick: Some("tester".into()),
        username: Some("tester".into()),
        ..Default::default()
    });
    // Nothing listens on port 9; a configuration error must come first.
    let err = client
        .connect("127.0.0.1", 9, Credentials::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

// ── Full session ────────────────────────────────────────────────────

#[tokio::test]
async fn join_chat_and_quit() {
    let (client, mut server) = connect_client(config()).await;

    server.send("PING :abc123").await;
    assert_eq!(server.expect_line("PONG").await, "PONG abc123\r\n");

    let joining = {
        let client = client.clone();
        tokio::spawn(async move { client.join_channel("#test").await })
    };
    assert_eq!(server.expect_line("JOIN").await, "JOIN #test\r\n");
    server.send(":tester!tester@localhost JOIN #test").await;
    server.send(":irc.example.net 353 tester = #test :a").await;
    server.send(":irc.example.net 353 tester = #test :b").await;
    server.send("PING :mid-join").await;
    server.send(":irc.example.net 353 tester = #test :c").await;
    server
        .send(":irc.example.net 366 tester #test :End of /NAMES list.")
        .await;
    assert_eq!(server.expect_line("PONG").await, "PONG mid-join\r\n");

    let channel = joining.await.unwrap().unwrap();
    assert_eq!(channel.member_count(), 3);
    assert_eq!(channel.members, vec!["a", "b", "c"]);
    assert!(client.get_channel("#test").is_some());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let listener = Listener::new(move |event| {
        let tx = tx.clone();
        async move {
            if let Event::Message(msg) = event {
                let _ = tx.send(msg);
            }
        }
    });
    client.register_listener(EventKind::Message, &listener);

    server.send(":bob!bob@example.org PRIVMSG #test :hi tester").await;
    server.send(":bob!bob@example.org PRIVMSG tester :psst").await;

    let mut received = vec![
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap(),
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap(),
    ];
    received.sort_by(|a, b| a.body.cmp(&b.body));
    assert_eq!(received[0].body, "hi tester");
    assert!(!received[0].is_private());
    assert_eq!(received[1].body, "psst");
    assert!(received[1].is_private());

    client.send_message("#test", "hello bob").await.unwrap();
    assert_eq!(
        server.expect_line("PRIVMSG").await,
        "PRIVMSG #test :hello bob\r\n"
    );

    client.close(Some("done testing")).await.unwrap();
    assert_eq!(server.expect_line("QUIT").await, "QUIT :done testing\r\n");
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(client.get_channel("#test").is_none());
}

#[tokio::test]
async fn accumulate_reconstructs_a_listing() {
    let (client, mut server) = connect_client(config()).await;

    let listing = client.events().subscribe(EventKind::ServerReply).unwrap();
    assert_eq!(client.events().listener_count(EventKind::ServerReply), 0);

    server.send(":irc.example.net 375 tester :- message of the day -").await;
    server.send(":irc.example.net 372 tester :- line one").await;
    server.send(":irc.example.net 372 tester :- line two").await;
    server.send(":irc.example.net 376 tester :End of MOTD").await;

    let events = listing
        .accumulate(
            |e| e.is_reply(ReplyCode::RPL_MOTD),
            |e| e.is_reply(ReplyCode::RPL_ENDOFMOTD),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    let params: Vec<_> = events
        .iter()
        .map(|e| e.as_server_reply().unwrap().params.clone())
        .collect();
    assert_eq!(params, vec!["- line one", "- line two", "End of MOTD"]);
}

#[tokio::test]
async fn hangup_after_welcome_leaves_client_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = Client::new(config());

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap();
        lines.next_line().await.unwrap();
        write
            .write_all(b":irc.example.net 001 tester :Welcome\r\n")
            .await
            .unwrap();
    });

    let result = client
        .connect("127.0.0.1", port, Credentials::default())
        .await;
    server.await.unwrap();

    // Either the hangup is seen before login completes, or right after.
    if let Err(e) = result {
        assert!(matches!(e, Error::ConnectionClosed), "{e}");
    }
    let disconnected = client
        .wait_for(EventKind::Disconnected, |_| true, Duration::from_secs(2))
        .await;
    assert!(matches!(
        disconnected,
        Ok(Event::Disconnected { .. }) | Err(Error::ConnectionClosed)
    ));
    while client.state() != ConnectionState::Closed {
        tokio::task::yield_now().await;
    }
    assert!(client.events().is_closed());
}
