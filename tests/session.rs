/*
 * session.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * End-to-end tests against a scripted POP3 server on a loopback socket.
 * Each script is a strict expect/reply sequence: an unexpected client
 * line fails the server task, a missing one deadlocks into the test
 * deadline. Pipelining tests withhold every reply until the whole batch
 * has arrived, so a client that round-trips per command cannot pass.
 */

use std::future::Future;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use cassetta::{Pop3Client, Pop3Error, SecurityMode};

#[derive(Clone, Copy)]
enum Step {
    /// Read one line and assert it matches.
    Expect(&'static str),
    /// Write raw bytes to the client.
    Send(&'static str),
}

use Step::{Expect, Send};

async fn script_server(steps: Vec<Step>) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        for step in steps {
            match step {
                Send(bytes) => write_half.write_all(bytes.as_bytes()).await.unwrap(),
                Expect(expected) => {
                    let mut line = String::new();
                    reader.read_line(&mut line).await.unwrap();
                    assert_eq!(line.trim_end_matches(['\r', '\n']), expected);
                }
            }
        }
    });
    (port, handle)
}

async fn deadline<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("test deadline hit (client stalled)")
}

async fn connect(port: u16) -> Pop3Client {
    let mut client = Pop3Client::new();
    client
        .connect("127.0.0.1", port, SecurityMode::None)
        .await
        .unwrap();
    client
}

/// Shared Vec sink for protocol logger assertions.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

#[tokio::test]
async fn basic_session() {
    let (port, server) = script_server(vec![
        Send("+OK Hello there.\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nEXPIRE 31\r\nTOP\r\nUIDL\r\n.\r\n"),
        Expect("USER username"),
        Send("+OK\r\n"),
        Expect("PASS password"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nEXPIRE 31\r\nTOP\r\nUIDL\r\nRESP-CODES\r\n.\r\n"),
        Expect("STAT"),
        Send("+OK 7 1800662\r\n"),
        Expect("LIST"),
        Send("+OK\r\n1 1024\r\n2 2048\r\n3 3072\r\n4 4096\r\n5 5120\r\n6 6144\r\n7 7168\r\n.\r\n"),
        Expect("QUIT"),
        Send("+OK\r\n"),
    ])
    .await;

    deadline(async {
        let mut client = connect(port).await;
        assert_eq!(client.capabilities().unwrap().expire_days, 31);

        client.authenticate("username", "password").await.unwrap();
        assert!(client.is_authenticated());

        assert_eq!(client.message_count().await.unwrap(), 7);
        assert_eq!(client.count(), 7);
        assert_eq!(client.size(), 1800662);

        let sizes = client.message_sizes().await.unwrap();
        assert_eq!(sizes, [1024, 2048, 3072, 4096, 5120, 6144, 7168]);

        client.disconnect(true).await.unwrap();
        assert!(!client.is_connected());
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn pipelined_retrieve_is_one_flush() {
    // No reply leaves the server until all three RETR lines are in; a
    // client waiting for responses between commands deadlocks here.
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nPIPELINING\r\nTOP\r\nUIDL\r\n.\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS p"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nPIPELINING\r\nTOP\r\nUIDL\r\n.\r\n"),
        Expect("RETR 1"),
        Expect("RETR 2"),
        Expect("RETR 3"),
        Send("+OK\r\nfirst message\r\n.\r\n"),
        Send("+OK\r\nsecond message\r\nwith two lines\r\n.\r\n"),
        Send("+OK\r\n..stuffed line\r\n.\r\n"),
    ])
    .await;

    deadline(async {
        let mut client = connect(port).await;
        client.authenticate("u", "p").await.unwrap();

        let messages = client.retrieve_messages(&[0, 1, 2]).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], b"first message\r\n");
        assert_eq!(messages[1], b"second message\r\nwith two lines\r\n");
        assert_eq!(messages[2], b".stuffed line\r\n");
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn uidl_probe_success() {
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("-ERR unknown command\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS p"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("-ERR unknown command\r\n"),
        Expect("UIDL 1"),
        Send("+OK 1 abc123\r\n"),
        Expect("UIDL"),
        Send("+OK\r\n1 abc123\r\n.\r\n"),
    ])
    .await;

    deadline(async {
        let mut client = connect(port).await;
        client.authenticate("u", "p").await.unwrap();

        let uids = client.message_uids().await.unwrap();
        assert_eq!(uids, ["abc123"]);
        assert!(client
            .capabilities()
            .unwrap()
            .has(cassetta::Capability::Uidl));
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn uidl_probe_failure_is_not_supported() {
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("-ERR unknown command\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS p"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("-ERR unknown command\r\n"),
        Expect("UIDL 1"),
        Send("-ERR not supported\r\n"),
    ])
    .await;

    deadline(async {
        let mut client = connect(port).await;
        client.authenticate("u", "p").await.unwrap();

        let err = client.message_uids().await.unwrap_err();
        assert!(matches!(err, Pop3Error::NotSupported(_)));
        assert!(client.is_connected());

        // The verdict sticks: no second probe on the wire.
        let err = client.message_uid(0).await.unwrap_err();
        assert!(matches!(err, Pop3Error::NotSupported(_)));
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn auth_failure_preserves_session() {
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nTOP\r\n.\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS wrong"),
        Send("-ERR bad pass\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS right"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nTOP\r\nUIDL\r\n.\r\n"),
        Expect("QUIT"),
        Send("+OK bye\r\n"),
    ])
    .await;

    deadline(async {
        let mut client = connect(port).await;

        let err = client.authenticate("u", "wrong").await.unwrap_err();
        assert!(matches!(err, Pop3Error::Auth { .. }));
        assert!(client.is_connected());
        assert!(!client.is_authenticated());

        client.authenticate("u", "right").await.unwrap();
        assert!(client.is_authenticated());

        // A second authenticate never touches the wire.
        let err = client.authenticate("u", "right").await.unwrap_err();
        assert!(matches!(err, Pop3Error::AlreadyAuthenticated));

        client.disconnect(true).await.unwrap();
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn apop_digest_and_redaction() {
    let (port, server) = script_server(vec![
        Send("+OK <d99894e8@example>\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nTOP\r\n.\r\n"),
        // hex(md5("<d99894e8@example>" + "password"))
        Expect("APOP username d99894e8445daf54c4ce781ef21331b7"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nTOP\r\nUIDL\r\n.\r\n"),
    ])
    .await;

    let capture = Capture::default();
    deadline(async {
        let mut client = Pop3Client::new();
        client.set_protocol_logger(Box::new(capture.clone()), true);
        client
            .connect("127.0.0.1", port, SecurityMode::None)
            .await
            .unwrap();
        client.authenticate("username", "password").await.unwrap();
        assert!(client.is_authenticated());
    })
    .await;
    server.await.unwrap();

    let log = capture.text();
    assert!(
        log.contains("C: APOP ******** ********"),
        "APOP not redacted: {}",
        log
    );
    assert!(!log.contains("d99894e8445daf54c4ce781ef21331b7"));
    assert!(!log.contains("password"));
}

#[tokio::test]
async fn sasl_login_exchange_and_redaction() {
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nSASL LOGIN\r\nTOP\r\n.\r\n"),
        Expect("AUTH LOGIN"),
        Send("+ \r\n"),
        Expect("dXNlcm5hbWU="),
        Send("+ \r\n"),
        Expect("cGFzc3dvcmQ="),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nSASL LOGIN\r\nTOP\r\nUIDL\r\n.\r\n"),
    ])
    .await;

    let capture = Capture::default();
    deadline(async {
        let mut client = Pop3Client::new();
        client.set_protocol_logger(Box::new(capture.clone()), true);
        client
            .connect("127.0.0.1", port, SecurityMode::None)
            .await
            .unwrap();
        client.authenticate("username", "password").await.unwrap();
        assert!(client.is_authenticated());
    })
    .await;
    server.await.unwrap();

    let log = capture.text();
    assert!(log.contains("C: AUTH ********"), "AUTH line: {}", log);
    assert!(!log.contains("dXNlcm5hbWU="));
    assert!(!log.contains("cGFzc3dvcmQ="));
    // Both continuation lines masked whole.
    assert_eq!(log.matches("C: ********\n").count(), 2, "log: {}", log);
}

#[tokio::test]
async fn command_error_keeps_session_protocol_error_closes_it() {
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\n.\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS p"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\n.\r\n"),
        Expect("DELE 99"),
        Send("-ERR no such message\r\n"),
        Expect("NOOP"),
        Send("how did this get here\r\n"),
    ])
    .await;

    deadline(async {
        let mut client = connect(port).await;
        client.authenticate("u", "p").await.unwrap();

        let err = client.delete(98).await.unwrap_err();
        assert!(matches!(err, Pop3Error::Command { .. }));
        assert!(client.is_connected());

        let err = client.noop().await.unwrap_err();
        assert!(matches!(err, Pop3Error::Protocol(_)));
        assert!(!client.is_connected());
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn state_violations_never_touch_the_wire() {
    let mut client = Pop3Client::new();
    assert!(matches!(
        client.noop().await.unwrap_err(),
        Pop3Error::NotConnected
    ));
    assert!(matches!(
        client.authenticate("u", "p").await.unwrap_err(),
        Pop3Error::NotConnected
    ));
    assert!(matches!(
        client.retrieve(0).await.unwrap_err(),
        Pop3Error::NotConnected
    ));

    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\n.\r\n"),
    ])
    .await;
    deadline(async {
        let mut client = connect(port).await;
        // Connected but not authenticated: transaction ops refused locally.
        assert!(matches!(
            client.retrieve(0).await.unwrap_err(),
            Pop3Error::NotAuthenticated
        ));
        assert!(matches!(
            client
                .connect("127.0.0.1", port, SecurityMode::None)
                .await
                .unwrap_err(),
            Pop3Error::AlreadyConnected
        ));
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn utf8_rejected_after_authentication() {
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nUTF8\r\n.\r\n"),
        Expect("UTF8"),
        Send("+OK\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS p"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nUTF8\r\n.\r\n"),
    ])
    .await;

    deadline(async {
        let mut client = connect(port).await;
        client.enable_utf8().await.unwrap();
        // Idempotent pre-auth: no second UTF8 on the wire.
        client.enable_utf8().await.unwrap();
        client.authenticate("u", "p").await.unwrap();
        assert!(matches!(
            client.enable_utf8().await.unwrap_err(),
            Pop3Error::AlreadyAuthenticated
        ));
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn bulk_empty_input_is_free_and_duplicates_preserved() {
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nPIPELINING\r\n.\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS p"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nPIPELINING\r\n.\r\n"),
        Expect("RETR 2"),
        Expect("RETR 2"),
        Send("+OK\r\ndup\r\n.\r\n+OK\r\ndup\r\n.\r\n"),
    ])
    .await;

    deadline(async {
        let mut client = connect(port).await;
        client.authenticate("u", "p").await.unwrap();

        // Empty input: no wire traffic (the script has no entry for it).
        assert!(client.retrieve_messages(&[]).await.unwrap().is_empty());
        client.delete_messages(&[]).await.unwrap();

        let messages = client.retrieve_messages(&[1, 1]).await.unwrap();
        assert_eq!(messages, vec![b"dup\r\n".to_vec(), b"dup\r\n".to_vec()]);
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn pipelined_error_drains_batch_and_preserves_session() {
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nPIPELINING\r\n.\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS p"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\nPIPELINING\r\n.\r\n"),
        Expect("DELE 1"),
        Expect("DELE 2"),
        Expect("DELE 3"),
        Send("+OK\r\n-ERR no such message\r\n+OK\r\n"),
        Expect("NOOP"),
        Send("+OK\r\n"),
    ])
    .await;

    deadline(async {
        let mut client = connect(port).await;
        client.authenticate("u", "p").await.unwrap();

        let err = client.delete_messages(&[0, 1, 2]).await.unwrap_err();
        assert!(matches!(err, Pop3Error::Command { .. }));
        assert!(client.is_connected());

        // All three responses were consumed; the session lines up again.
        client.noop().await.unwrap();
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn disconnect_events_carry_is_requested() {
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\n.\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS p"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\n.\r\n"),
        Expect("QUIT"),
        Send("+OK bye\r\n"),
    ])
    .await;

    let connected = Arc::new(Mutex::new(None::<(String, u16)>));
    let requested = Arc::new(Mutex::new(None::<bool>));
    deadline(async {
        let mut client = Pop3Client::new();
        let connected_slot = Arc::clone(&connected);
        client.on_connected(move |event| {
            *connected_slot.lock().unwrap() = Some((event.host.clone(), event.port));
        });
        let requested_slot = Arc::clone(&requested);
        client.on_disconnected(move |event| {
            *requested_slot.lock().unwrap() = Some(event.is_requested);
        });
        client
            .connect("127.0.0.1", port, SecurityMode::None)
            .await
            .unwrap();
        client.authenticate("u", "p").await.unwrap();
        client.disconnect(true).await.unwrap();
    })
    .await;
    server.await.unwrap();

    assert_eq!(
        connected.lock().unwrap().clone(),
        Some(("127.0.0.1".to_string(), port))
    );
    assert_eq!(*requested.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn streamed_retrieve_delivers_chunks_in_order() {
    let (port, server) = script_server(vec![
        Send("+OK ready\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\n.\r\n"),
        Expect("USER u"),
        Send("+OK\r\n"),
        Expect("PASS p"),
        Send("+OK\r\n"),
        Expect("CAPA"),
        Send("+OK\r\nUSER\r\n.\r\n"),
        Expect("RETR 1"),
        Send("+OK\r\nSubject: hi\r\n\r\n..leading dot\r\nbody\r\n.\r\n"),
    ])
    .await;

    deadline(async {
        let mut client = connect(port).await;
        client.authenticate("u", "p").await.unwrap();

        let mut streamed = Vec::new();
        client
            .retrieve_stream(0, |chunk| streamed.extend_from_slice(chunk))
            .await
            .unwrap();
        assert_eq!(streamed, b"Subject: hi\r\n\r\n.leading dot\r\nbody\r\n");
    })
    .await;
    server.await.unwrap();
}
