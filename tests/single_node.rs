//! End-to-end tests driving real in-process nodes over loopback TCP
//! (spec section 8's literal scenarios), the way the teacher's own
//! `tests/integration_testing.rs` drives a real client against a real
//! server instead of mocking the transport.

use std::time::Duration;

use bytes::Bytes;
use codec::{CubeAddress, Payload};
use cube_node::config::{Config, Log, Node, Policy};
use engine::InboxEntry;

fn config(listen: &str) -> Config {
    Config {
        node: Node {
            listen: listen.parse().unwrap(),
            external: listen.parse().unwrap(),
            dim: 0,
            idle_timeout: 20,
        },
        policy: Policy::default(),
        log: Log::default(),
    }
}

fn settle() {
    std::thread::sleep(Duration::from_millis(150));
}

/// Node A binds alone at dimension 0. Client C attaches through it:
/// C's address becomes 1, A's dimension becomes 1, and a unicast from C
/// to A is delivered.
#[test]
fn single_node_cube_admits_one_client() {
    let a = cube_node::startup(config("127.0.0.1:21300")).expect("start A");
    settle();

    let c = cube_node::startup(config("127.0.0.1:21301")).expect("start C");
    let addr = c.connect("127.0.0.1:21300".parse().unwrap()).expect("connect");
    assert_eq!(addr, CubeAddress::Node(1));

    c.send(CubeAddress::Node(0), Payload::Bytes(Bytes::from_static(b"hi")));

    match a.recv() {
        InboxEntry::Data { src, payload } => {
            assert_eq!(src, CubeAddress::Node(1));
            assert_eq!(payload, Payload::Bytes(Bytes::from_static(b"hi")));
        }
        other => panic!("unexpected inbox entry: {other:?}"),
    }

    a.shutdown();
    c.shutdown();
}

/// A `send` to a cube address with no route back surfaces as an
/// `InboxEntry::Invalid` rather than panicking or being silently dropped.
#[test]
fn send_to_unreachable_address_reports_invalid() {
    let a = cube_node::startup(config("127.0.0.1:21310")).expect("start A");
    settle();

    a.send(CubeAddress::Node(7), Payload::Bytes(Bytes::from_static(b"nobody")));

    match a.recv() {
        InboxEntry::Invalid { attempted_dst } => assert_eq!(attempted_dst, CubeAddress::Node(7)),
        other => panic!("unexpected inbox entry: {other:?}"),
    }

    a.shutdown();
}

/// A second client joining after the first grows the cube to dimension 2
/// and both original neighbors remain reachable.
#[test]
fn third_node_expands_dimension() {
    let a = cube_node::startup(config("127.0.0.1:21320")).expect("start A");
    settle();

    let c1 = cube_node::startup(config("127.0.0.1:21321")).expect("start C1");
    let addr1 = c1.connect("127.0.0.1:21320".parse().unwrap()).expect("connect C1");
    assert_eq!(addr1, CubeAddress::Node(1));
    settle();

    let c2 = cube_node::startup(config("127.0.0.1:21322")).expect("start C2");
    let addr2 = c2.connect("127.0.0.1:21320".parse().unwrap()).expect("connect C2");
    assert_ne!(addr2, addr1);
    settle();

    c2.send(CubeAddress::Node(0), Payload::Bytes(Bytes::from_static(b"ping")));
    match a.recv() {
        InboxEntry::Data { payload, .. } => assert_eq!(payload, Payload::Bytes(Bytes::from_static(b"ping"))),
        other => panic!("unexpected inbox entry: {other:?}"),
    }

    a.shutdown();
    c1.shutdown();
    c2.shutdown();
}
