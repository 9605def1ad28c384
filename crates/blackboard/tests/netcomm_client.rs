// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic

//! NetworkClient integration tests against an in-process TCP hub.
//!
//! The hub accepts one connection per scripted [`Peer`] behavior, in order,
//! so a single test can walk a client through interrupted, refused and
//! successful sessions.

use std::io::Write;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use blackboard::netcomm::{
    ClientHandler, ConnectionState, FrameCodec, NetworkClient, NetworkMessage, COMPONENT_NETCOMM,
    MSG_HELLO,
};
use blackboard::{ClientConfig, Error, Message};

const CLOSE_TRIGGER: u16 = 0xFFFF;

#[derive(Clone, Copy, Debug)]
enum Peer {
    /// Reads the hello, never answers
    Silent,
    /// Answers the hello and echoes every frame
    Echo,
    /// Like `Echo`, but drops the connection on a `CLOSE_TRIGGER` frame
    CloseOnTrigger,
    /// Answers with a hello of an unknown protocol version
    WrongVersion,
}

fn spawn_hub(script: Vec<Peer>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for peer in script {
            match listener.accept() {
                Ok((stream, _)) => serve(stream, peer),
                Err(_) => return,
            }
        }
    });
    port
}

fn serve(mut stream: TcpStream, peer: Peer) {
    let mut codec = FrameCodec::new(1 << 20);
    match codec.decode(&mut stream) {
        Ok(Some(hello)) if hello.hello_version().is_ok() => {}
        _ => return,
    }

    match peer {
        Peer::Silent => {
            while let Ok(Some(_)) = codec.decode(&mut stream) {}
        }
        Peer::WrongVersion => {
            let hello = NetworkMessage::new(COMPONENT_NETCOMM, MSG_HELLO, 99u16.to_be_bytes().to_vec());
            if stream.write_all(&hello.encode()).is_ok() {
                while let Ok(Some(_)) = codec.decode(&mut stream) {}
            }
        }
        Peer::Echo | Peer::CloseOnTrigger => {
            if stream.write_all(&NetworkMessage::hello().encode()).is_err() {
                return;
            }
            while let Ok(Some(msg)) = codec.decode(&mut stream) {
                if matches!(peer, Peer::CloseOnTrigger) && msg.message_type() == CLOSE_TRIGGER {
                    let _ = stream.shutdown(Shutdown::Both);
                    return;
                }
                if stream.write_all(&msg.encode()).is_err() {
                    return;
                }
            }
        }
    }
}

fn test_config() -> ClientConfig {
    ClientConfig {
        handshake_timeout: Some(Duration::from_secs(10)),
        wait_timeout: Some(Duration::from_secs(5)),
        recv_poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[derive(Default)]
struct Recorder {
    received: Mutex<Vec<NetworkMessage>>,
    client_ids: Mutex<Vec<Option<u32>>>,
    established: AtomicUsize,
    died: AtomicUsize,
}

impl ClientHandler for Recorder {
    fn inbound_received(&self, msg: &Message<NetworkMessage>, client_id: Option<u32>) {
        self.received.lock().push(msg.payload().clone());
        self.client_ids.lock().push(client_id);
    }

    fn connection_established(&self, _client_id: Option<u32>) {
        self.established.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_died(&self, _client_id: Option<u32>) {
        self.died.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_request_response_round_trip() {
    let port = spawn_hub(vec![Peer::Echo]);
    let client = NetworkClient::with_id(11, test_config());
    let recorder = Arc::new(Recorder::default());
    client.register_handler(recorder.clone(), 5).unwrap();

    client.connect("127.0.0.1", port).unwrap();
    assert_eq!(client.state(), ConnectionState::Established);
    assert!(client.peer_addr().is_some());
    assert!(matches!(
        client.connect("127.0.0.1", port),
        Err(Error::AlreadyConnected)
    ));

    let request = Message::new(NetworkMessage::new(5, 42, b"ping".to_vec()));
    client.enqueue_and_wait(&request).unwrap();

    {
        let received = recorder.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message_type(), 42);
        assert_eq!(received[0].payload(), b"ping");
    }
    assert_eq!(*recorder.client_ids.lock(), vec![Some(11)]);
    assert!(wait_for(|| recorder.established.load(Ordering::SeqCst) == 1));
    assert!(wait_for(|| !request.is_queued()));

    assert!(wait_for(|| client.stats().messages_sent == 1));
    let stats = client.stats();
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.bytes_received, 4);
    assert_eq!(stats.sessions_established, 1);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(recorder.died.load(Ordering::SeqCst), 1);
}

#[test]
fn test_messages_keep_send_order() {
    let port = spawn_hub(vec![Peer::Echo]);
    let client = NetworkClient::new(test_config());
    let recorder = Arc::new(Recorder::default());
    client.register_handler(recorder.clone(), 3).unwrap();
    client.connect("127.0.0.1", port).unwrap();

    for n in 0..50u16 {
        client.send(NetworkMessage::new(3, n, n.to_be_bytes().to_vec())).unwrap();
    }
    assert!(wait_for(|| recorder.received.lock().len() == 50));
    let types: Vec<u16> = recorder.received.lock().iter().map(|m| m.message_type()).collect();
    assert_eq!(types, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_concurrent_waiters_on_one_component() {
    let port = spawn_hub(vec![Peer::Echo]);
    let client = NetworkClient::new(test_config());
    let recorder = Arc::new(Recorder::default());
    client.register_handler(recorder.clone(), 5).unwrap();
    client.connect("127.0.0.1", port).unwrap();

    // A response that arrives for one caller must not be lost by the other
    for round in 0..100u16 {
        thread::scope(|s| {
            let callers: Vec<_> = (0..2u16)
                .map(|n| {
                    let client = &client;
                    s.spawn(move || {
                        client.enqueue_and_wait(&Message::new(NetworkMessage::signal(5, round * 2 + n)))
                    })
                })
                .collect();
            for caller in callers {
                let result = caller.join().unwrap();
                assert!(result.is_ok(), "round {}: {:?}", round, result);
            }
        });
    }
    assert!(wait_for(|| recorder.received.lock().len() == 200));
}

#[test]
fn test_unregistered_component_is_dropped() {
    let port = spawn_hub(vec![Peer::Echo]);
    let client = NetworkClient::new(test_config());
    client.connect("127.0.0.1", port).unwrap();

    // The waiter is released even though nobody handles component 9
    client
        .enqueue_and_wait(&Message::new(NetworkMessage::signal(9, 1)))
        .unwrap();
    assert_eq!(client.stats().messages_dropped, 1);

    let recorder = Arc::new(Recorder::default());
    client.register_handler(recorder.clone(), 9).unwrap();
    client
        .enqueue_and_wait(&Message::new(NetworkMessage::signal(9, 2)))
        .unwrap();
    assert_eq!(recorder.received.lock().len(), 1);
    assert_eq!(client.stats().messages_dropped, 1);
}

#[test]
fn test_payload_limit() {
    let port = spawn_hub(vec![Peer::Echo]);
    let client = NetworkClient::new(ClientConfig {
        max_payload_size: 16,
        ..test_config()
    });
    client.connect("127.0.0.1", port).unwrap();

    let big = Message::new(NetworkMessage::new(2, 1, vec![0u8; 32]));
    assert!(matches!(
        client.enqueue(&big),
        Err(Error::PayloadTooLarge { size: 32, max: 16 })
    ));
    assert!(!big.is_queued());
}

#[test]
fn test_interrupt_connect_then_reconnect() {
    let port = spawn_hub(vec![Peer::Silent, Peer::Echo]);
    let client = Arc::new(NetworkClient::new(test_config()));

    let interrupter = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            assert!(wait_for(|| client.state() == ConnectionState::Connecting));
            thread::sleep(Duration::from_millis(50));
            client.interrupt_connect();
        })
    };

    let err = client.connect("127.0.0.1", port).unwrap_err();
    interrupter.join().unwrap();
    assert!(matches!(err, Error::ConnectInterrupted), "got {:?}", err);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.send(NetworkMessage::signal(1, 1)),
        Err(Error::NotConnected)
    ));

    client.reconnect().unwrap();
    assert!(client.connected());
}

#[test]
fn test_handshake_timeout() {
    let port = spawn_hub(vec![Peer::Silent]);
    let client = NetworkClient::new(ClientConfig {
        handshake_timeout: Some(Duration::from_millis(100)),
        ..test_config()
    });
    assert!(matches!(
        client.connect("127.0.0.1", port),
        Err(Error::ConnectTimeout)
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_protocol_version_mismatch() {
    let port = spawn_hub(vec![Peer::WrongVersion]);
    let client = NetworkClient::new(test_config());
    let err = client.connect("127.0.0.1", port).unwrap_err();
    assert!(matches!(err, Error::Protocol(ref reason) if reason.contains("99")), "got {:?}", err);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_connection_death_notifies_handlers() {
    let port = spawn_hub(vec![Peer::CloseOnTrigger, Peer::Echo]);
    let client = NetworkClient::new(test_config());
    let recorder = Arc::new(Recorder::default());
    client.register_handler(recorder.clone(), 4).unwrap();
    client.connect("127.0.0.1", port).unwrap();

    let waiter = thread::scope(|s| {
        let waiting = s.spawn(|| client.wait(4, None));
        client.send(NetworkMessage::signal(4, CLOSE_TRIGGER)).unwrap();
        waiting.join().unwrap()
    });
    assert!(matches!(waiter, Err(Error::ConnectionDead)));

    assert!(wait_for(|| client.state() == ConnectionState::Dead));
    assert!(wait_for(|| recorder.died.load(Ordering::SeqCst) == 1));
    assert!(matches!(
        client.send(NetworkMessage::signal(4, 1)),
        Err(Error::ConnectionDead)
    ));

    // Dead sessions can be replaced
    client.reconnect().unwrap();
    assert!(wait_for(|| recorder.established.load(Ordering::SeqCst) == 2));
    client
        .enqueue_and_wait(&Message::new(NetworkMessage::signal(4, 7)))
        .unwrap();
}

#[test]
fn test_deregister_wakes_waiter() {
    let port = spawn_hub(vec![Peer::Silent]);
    let client = NetworkClient::new(ClientConfig {
        handshake_timeout: Some(Duration::from_millis(100)),
        ..test_config()
    });
    // Waiting requires an established session
    assert!(client.connect("127.0.0.1", port).is_err());
    assert!(matches!(client.wait(6, None), Err(Error::NotConnected)));

    let echo_port = spawn_hub(vec![Peer::Echo]);
    client.connect("127.0.0.1", echo_port).unwrap();
    client
        .register_handler(Arc::new(Recorder::default()), 6)
        .unwrap();

    thread::scope(|s| {
        let waiting = s.spawn(|| client.wait(6, Some(Duration::from_secs(5))));
        thread::sleep(Duration::from_millis(50));
        assert!(client.deregister_handler(6));
        assert!(waiting.join().unwrap().is_ok());
    });

    assert!(matches!(
        client.wait(6, Some(Duration::from_millis(20))),
        Err(Error::WaitTimeout { component_id: 6 })
    ));
}
