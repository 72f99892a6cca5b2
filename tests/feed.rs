//! End-to-end transport test: engine thread + TCP feed server + wire
//! client, asserting the causal frame stream a client observes.

use std::time::{Duration, Instant};

use simex::messages::{AckStatus, MsgType, ServerMessage, Side};
use simex::net::{FeedServer, WireClient};
use simex::server::EngineConfig;

fn recv_n(client: &mut WireClient, n: usize) -> Vec<ServerMessage> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut got = Vec::with_capacity(n);
    while got.len() < n {
        match client.poll_message().expect("feed read") {
            Some(msg) => got.push(msg),
            None => assert!(
                Instant::now() < deadline,
                "timed out with {} of {n} messages: {got:?}",
                got.len()
            ),
        }
    }
    got
}

#[test]
fn wire_client_sees_the_causal_stream() {
    let cfg = EngineConfig { tracked_users: vec![1], ..Default::default() };
    let (mut server, gate, feed) = simex::spawn(cfg);
    let mut net = FeedServer::bind("127.0.0.1:0", gate, feed).expect("bind feed server");
    let mut client =
        WireClient::connect(net.local_addr(), Duration::from_millis(20)).expect("connect");

    // A resting bid: ACK, TOB, PNL (bid-only mid), L2.
    client.send_new_order(1, Side::Buy, 100.0, 10).expect("send");
    let burst = recv_n(&mut client, 4);

    match burst[0] {
        ServerMessage::Ack(a) => {
            assert_eq!(a.status, AckStatus::Ok);
            assert_eq!(a.kind, MsgType::NewOrder);
            assert_eq!(a.order_id, 1);
        }
        ref other => panic!("expected ACK first, got {other:?}"),
    }
    match burst[1] {
        ServerMessage::TopOfBook(t) => {
            assert!(t.has_bid && !t.has_ask);
            assert_eq!((t.bid_price, t.bid_quantity), (100.0, 10));
        }
        ref other => panic!("expected TOB, got {other:?}"),
    }
    match burst[2] {
        ServerMessage::Pnl(p) => {
            assert_eq!(p.user_id, 1);
            assert_eq!(p.position, 0.0);
        }
        ref other => panic!("expected PNL, got {other:?}"),
    }
    match burst[3] {
        ServerMessage::L2(l) => {
            assert_eq!(l.side, Side::Buy);
            assert_eq!((l.price, l.quantity), (100.0, 10));
        }
        ref other => panic!("expected L2, got {other:?}"),
    }

    // A crossing sell from another user prints a trade at the maker price.
    client.send_new_order(2, Side::Sell, 99.0, 4).expect("send");
    let burst = recv_n(&mut client, 6);
    // PNL (user 1 bought as the resting side), TRADE, ACK(0), TOB, PNL, L2.
    assert!(matches!(burst[0], ServerMessage::Pnl(p) if p.position == 4.0));
    match burst[1] {
        ServerMessage::Trade(t) => {
            assert_eq!((t.price, t.quantity), (100.0, 4));
            assert_eq!((t.buy_user_id, t.sell_user_id), (1, 2));
        }
        ref other => panic!("expected TRADE, got {other:?}"),
    }
    assert!(
        matches!(burst[2], ServerMessage::Ack(a) if a.order_id == 0 && a.status == AckStatus::Ok)
    );
    assert!(matches!(burst[3], ServerMessage::TopOfBook(t) if t.bid_quantity == 6));
    assert!(matches!(burst[4], ServerMessage::Pnl(_)));
    assert!(matches!(burst[5], ServerMessage::L2(l) if l.quantity == 6));

    // Cancel of an unknown id: a lone negative ACK.
    client.send_cancel(424242).expect("send");
    let burst = recv_n(&mut client, 1);
    match burst[0] {
        ServerMessage::Ack(a) => {
            assert_eq!(a.status, AckStatus::Error);
            assert_eq!(a.kind, MsgType::Cancel);
            assert_eq!(a.order_id, 424242);
        }
        ref other => panic!("expected negative ACK, got {other:?}"),
    }

    // Cancel the resting remainder: positive ACK, empty TOB, level removal.
    client.send_cancel(1).expect("send");
    let burst = recv_n(&mut client, 3);
    assert!(
        matches!(burst[0], ServerMessage::Ack(a) if a.status == AckStatus::Ok && a.order_id == 1)
    );
    assert!(matches!(burst[1], ServerMessage::TopOfBook(t) if !t.has_bid && !t.has_ask));
    assert!(matches!(burst[2], ServerMessage::L2(l) if l.quantity == 0));

    net.shutdown();
    server.stop();
}

#[test]
fn two_clients_both_receive_the_feed() {
    let cfg = EngineConfig { tracked_users: vec![], ..Default::default() };
    let (mut server, gate, feed) = simex::spawn(cfg);
    let mut net = FeedServer::bind("127.0.0.1:0", gate, feed).expect("bind feed server");

    let mut a = WireClient::connect(net.local_addr(), Duration::from_millis(20)).expect("a");
    let mut b = WireClient::connect(net.local_addr(), Duration::from_millis(20)).expect("b");

    // Handshake: once b sees the broadcast ACK for its own probe, both
    // clients are registered for fan-out.
    b.send_cancel(424242).expect("probe");
    let probe = recv_n(&mut b, 1);
    assert!(matches!(probe[0], ServerMessage::Ack(a) if a.status == AckStatus::Error));
    let probe = recv_n(&mut a, 1);
    assert!(matches!(probe[0], ServerMessage::Ack(a) if a.status == AckStatus::Error));

    a.send_new_order(1, Side::Sell, 101.0, 5).expect("send");
    let from_a = recv_n(&mut a, 3); // ACK, TOB, L2
    let from_b = recv_n(&mut b, 3);
    assert_eq!(from_a, from_b);

    net.shutdown();
    server.stop();
}
