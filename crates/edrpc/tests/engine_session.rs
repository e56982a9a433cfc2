//! End-to-end tests against a fake engine process listening on a real
//! domain socket.

#![cfg(unix)]

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use edrpc::codec::{encode, Decoder, Value};
use edrpc::rpc::Message;
use edrpc::Session;

fn temp_sock(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "edrpc-session-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("engine.sock")
}

/// Block until `want` complete messages have been decoded off the stream.
fn read_messages(stream: &mut UnixStream, decoder: &mut Decoder, want: usize) -> Vec<Message> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    while out.len() < want {
        let n = stream.read(&mut buf).expect("engine read");
        assert!(n > 0, "client closed before sending {want} messages");
        for value in decoder.feed(&buf[..n]) {
            out.push(Message::from_value(value).expect("client sent a malformed envelope"));
        }
    }
    out
}

fn write_message(stream: &mut UnixStream, message: Message) {
    let bytes = encode(&message.into_value());
    stream.write_all(&bytes).expect("engine write");
    stream.flush().expect("engine flush");
}

#[test]
fn request_round_trips_through_a_live_engine() {
    let path = temp_sock("roundtrip");
    let listener = UnixListener::bind(&path).unwrap();

    let engine = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut decoder = Decoder::new();
        let messages = read_messages(&mut stream, &mut decoder, 1);
        match &messages[0] {
            Message::Request { id, method, params } => {
                assert_eq!(method, "ping");
                assert_eq!(params, &[Value::UInt(1)]);
                write_message(
                    &mut stream,
                    Message::Response {
                        id: *id,
                        error: Value::Nil,
                        result: Value::from("pong"),
                    },
                );
            }
            other => panic!("expected a request, got {other:?}"),
        }
    });

    let session = Session::connect(&path).unwrap();
    let reply = session.request("ping", vec![Value::UInt(1)]).wait().unwrap();
    assert_eq!(reply, Value::from("pong"));
    engine.join().unwrap();
}

#[test]
fn responses_settle_out_of_order() {
    let path = temp_sock("reorder");
    let listener = UnixListener::bind(&path).unwrap();

    let engine = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut decoder = Decoder::new();
        let messages = read_messages(&mut stream, &mut decoder, 2);
        // Answer in reverse arrival order.
        for message in messages.into_iter().rev() {
            let Message::Request { id, method, .. } = message else {
                panic!("expected a request");
            };
            write_message(
                &mut stream,
                Message::Response {
                    id,
                    error: Value::Nil,
                    result: Value::from(format!("{method}-reply")),
                },
            );
        }
    });

    let session = Session::connect(&path).unwrap();
    let first = session.request("alpha", vec![]);
    let second = session.request("beta", vec![]);
    assert_eq!(second.wait().unwrap(), Value::from("beta-reply"));
    assert_eq!(first.wait().unwrap(), Value::from("alpha-reply"));
    engine.join().unwrap();
}

#[test]
fn engine_notifications_reach_event_callbacks() {
    let path = temp_sock("events");
    let listener = UnixListener::bind(&path).unwrap();

    let engine = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        write_message(
            &mut stream,
            Message::Notification {
                method: "highlight".into(),
                params: vec![Value::UInt(7), Value::from("keyword")],
            },
        );
        // Keep the socket open until the client is done reading.
        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf);
    });

    let session = Session::new();
    let (tx, rx) = mpsc::channel();
    session.on_event("highlight", move |params| {
        tx.send(params).expect("test channel");
    });
    session.connect_to(0, &path).unwrap();
    session.switch_to(0).unwrap();

    let params = rx.recv_timeout(Duration::from_secs(5)).expect("notification delivered");
    assert_eq!(params, vec![Value::UInt(7), Value::from("keyword")]);
    drop(session);
    engine.join().unwrap();
}

#[test]
fn redraw_batches_decode_single_char_strings_as_code_points() {
    let path = temp_sock("redraw");
    let listener = UnixListener::bind(&path).unwrap();

    let engine = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        // One chunk carrying a redraw batch with single-character cells.
        let batch = Value::Array(vec![
            Value::UInt(2),
            Value::from("redraw"),
            Value::Array(vec![Value::from("a"), Value::from("b")]),
        ]);
        stream.write_all(&encode(&batch)).expect("engine write");
        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf);
    });

    let session = Session::new();
    let (tx, rx) = mpsc::channel();
    session.on_event("redraw", move |params| {
        tx.send(params).expect("test channel");
    });
    session.connect_to(0, &path).unwrap();
    session.switch_to(0).unwrap();

    let params = rx.recv_timeout(Duration::from_secs(5)).expect("redraw delivered");
    assert_eq!(
        params,
        vec![Value::Array(vec![
            Value::UInt(u64::from(b'a')),
            Value::UInt(u64::from(b'b')),
        ])]
    );
    drop(session);
    engine.join().unwrap();
}

#[test]
fn engine_requests_hit_the_registered_handler() {
    let path = temp_sock("handler");
    let listener = UnixListener::bind(&path).unwrap();

    let engine = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        write_message(
            &mut stream,
            Message::Request {
                id: 99,
                method: "confirm-quit".into(),
                params: vec![Value::Bool(true)],
            },
        );
        let mut decoder = Decoder::new();
        let messages = read_messages(&mut stream, &mut decoder, 1);
        assert_eq!(
            messages[0],
            Message::Response {
                id: 99,
                error: Value::Nil,
                result: Value::from("quitting"),
            }
        );
    });

    let session = Session::new();
    session.handle_request("confirm-quit", |params| {
        assert_eq!(params, vec![Value::Bool(true)]);
        Ok(Value::from("quitting"))
    });
    session.connect_to(0, &path).unwrap();
    session.switch_to(0).unwrap();

    engine.join().unwrap();
}

#[test]
fn messages_sent_before_connecting_flush_in_order() {
    let path = temp_sock("buffered");
    let listener = UnixListener::bind(&path).unwrap();

    let engine = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut decoder = Decoder::new();
        read_messages(&mut stream, &mut decoder, 2)
    });

    let session = Session::new();
    session.notify("first", vec![Value::UInt(1)]);
    session.notify("second", vec![Value::UInt(2)]);

    session.connect_to(0, &path).unwrap();
    session.switch_to(0).unwrap();

    let messages = engine.join().unwrap();
    assert_eq!(
        messages,
        vec![
            Message::Notification {
                method: "first".into(),
                params: vec![Value::UInt(1)],
            },
            Message::Notification {
                method: "second".into(),
                params: vec![Value::UInt(2)],
            },
        ]
    );
}

#[test]
fn switching_engines_redirects_traffic() {
    let path_a = temp_sock("switch-a");
    let path_b = temp_sock("switch-b");
    let listener_a = UnixListener::bind(&path_a).unwrap();
    let listener_b = UnixListener::bind(&path_b).unwrap();

    let engine_a = thread::spawn(move || {
        let (mut stream, _) = listener_a.accept().unwrap();
        let mut decoder = Decoder::new();
        read_messages(&mut stream, &mut decoder, 1)
    });
    let engine_b = thread::spawn(move || {
        let (mut stream, _) = listener_b.accept().unwrap();
        let mut decoder = Decoder::new();
        read_messages(&mut stream, &mut decoder, 1)
    });

    let session = Session::new();
    session.connect_to(1, &path_a).unwrap();
    session.connect_to(2, &path_b).unwrap();

    session.switch_to(1).unwrap();
    session.notify("hello-a", vec![]);
    let messages_a = engine_a.join().unwrap();
    assert!(matches!(
        &messages_a[0],
        Message::Notification { method, .. } if method == "hello-a"
    ));

    session.switch_to(2).unwrap();
    session.notify("hello-b", vec![]);
    let messages_b = engine_b.join().unwrap();
    assert!(matches!(
        &messages_b[0],
        Message::Notification { method, .. } if method == "hello-b"
    ));
}
