// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use codec::{Packet, PublishAckPacket, PublishPacket, QoS, ReasonCode, SubscribeAckPacket};
use common::{test_options, MockBroker};
use lumo::{AsyncClient, ConnectionState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn reconnect_options(port: u16) -> lumo::ConnectOptions {
    let mut options = test_options(port);
    options
        .set_automatic_reconnect(true)
        .set_reconnect_delays(Duration::from_millis(50), Duration::from_millis(200));
    options
}

#[tokio::test]
async fn test_reconnect_without_session_clears_subscriptions() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = AsyncClient::new(reconnect_options(broker.port()));

    let (connect_result, mut session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        session.handshake(false).await;
        session
    });
    connect_result.unwrap();

    let deliveries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&deliveries);
    let (subscribe_result, ()) = tokio::join!(
        client.subscribe_with_handler(
            "a/b",
            QoS::AtLeastOnce,
            Arc::new(move |_publish| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ),
        async {
            let Packet::Subscribe(subscribe) = session.read_packet().await else {
                panic!("expected SUBSCRIBE");
            };
            session
                .send(SubscribeAckPacket::new(
                    subscribe.packet_id(),
                    ReasonCode::GrantedQoS1,
                ))
                .await;
        }
    );
    subscribe_result.unwrap();
    assert_eq!(client.subscriptions().len(), 1);

    // Kill the connection; auto-reconnect dials again.
    drop(session);
    let mut session = broker.accept().await;
    let connect = session.handshake(false).await;
    // Reconnect attempts must not discard the broker session on
    // purpose.
    assert!(!connect.clean_start());

    // Wait for the client to finish session reconciliation.
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // session-present=false wiped the registry; the old handler is
    // gone.
    assert_eq!(client.subscriptions().len(), 0);

    session
        .send(PublishPacket::new("a/b", QoS::AtMostOnce, b"stale").unwrap())
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(deliveries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reconnect_with_session_retransmits_qos1_publish() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = Arc::new(AsyncClient::new(reconnect_options(broker.port())));

    let (connect_result, session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        session.handshake(false).await;
        session
    });
    connect_result.unwrap();

    let publisher = Arc::clone(&client);
    let publish_task =
        tokio::spawn(async move { publisher.publish("q1", QoS::AtLeastOnce, b"retry").await });

    // Swallow the first attempt and drop the link without acking.
    let mut session = session;
    let Packet::Publish(first) = session.read_packet().await else {
        panic!("expected PUBLISH");
    };
    assert!(!first.dup());
    let id = first.packet_id();
    drop(session);

    // After the reconnect with session present, the same publish comes
    // back with the dup flag.
    let mut session = broker.accept().await;
    session.handshake(true).await;
    let Packet::Publish(retry) = session.read_packet().await else {
        panic!("expected retransmitted PUBLISH");
    };
    assert_eq!(retry.packet_id(), id);
    assert!(retry.dup());
    assert_eq!(retry.payload(), b"retry");

    session.send(PublishAckPacket::new(id)).await;
    let result = publish_task.await.unwrap().unwrap();
    assert_eq!(result.reason_code, ReasonCode::Success);
    assert_eq!(client.packet_ids_in_use(), 0);
}

#[tokio::test]
async fn test_reconnect_without_session_fails_inflight_with_session_lost() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = Arc::new(AsyncClient::new(reconnect_options(broker.port())));

    let (connect_result, session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        session.handshake(false).await;
        session
    });
    connect_result.unwrap();

    let publisher = Arc::clone(&client);
    let publish_task =
        tokio::spawn(async move { publisher.publish("q1", QoS::AtLeastOnce, b"lost").await });

    let mut session = session;
    let Packet::Publish(_first) = session.read_packet().await else {
        panic!("expected PUBLISH");
    };
    drop(session);

    // The new broker kept nothing.
    let mut session = broker.accept().await;
    session.handshake(false).await;

    let err = publish_task.await.unwrap().unwrap_err();
    assert_eq!(*err.kind(), lumo::ErrorKind::SessionLost);

    // No retransmission follows.
    assert!(
        session
            .try_read_packet(Duration::from_millis(150))
            .await
            .is_none()
    );
    assert_eq!(client.packet_ids_in_use(), 0);
}
