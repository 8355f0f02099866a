// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use codec::{Packet, PublishAckPacket, PublishPacket, QoS, ReasonCode, SubscribeAckPacket};
use common::{test_options, MockBroker};
use lumo::{AsyncClient, ConnectionState};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_connect_subscribe_publish_receive_round_trip() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = AsyncClient::new(test_options(broker.port()));

    let (connect_result, mut session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        let connect = session.handshake(false).await;
        assert_eq!(connect.client_id(), "lumo-test");
        assert!(connect.clean_start());
        session
    });
    let connect_result = connect_result.unwrap();
    assert_eq!(connect_result.reason_code, ReasonCode::Success);
    assert!(!connect_result.session_present);
    assert_eq!(client.state(), ConnectionState::Connected);

    // Global handler observes the round trip.
    let (message_tx, mut message_rx) = tokio::sync::mpsc::unbounded_channel();
    client.on_message(Arc::new(move |publish| {
        let _ = message_tx.send((
            publish.topic().to_string(),
            publish.payload().to_vec(),
            publish.qos(),
        ));
    }));

    let (subscribe_result, mut session) = tokio::join!(
        client.subscribe("sensors/#", QoS::AtLeastOnce),
        async move {
            let Packet::Subscribe(subscribe) = session.read_packet().await else {
                panic!("expected SUBSCRIBE");
            };
            assert_eq!(subscribe.topics()[0].filter().as_str(), "sensors/#");
            session
                .send(SubscribeAckPacket::new(
                    subscribe.packet_id(),
                    ReasonCode::GrantedQoS1,
                ))
                .await;
            session
        }
    );
    assert_eq!(
        subscribe_result.unwrap().reasons,
        vec![ReasonCode::GrantedQoS1]
    );

    let (publish_result, mut session) = tokio::join!(
        client.publish("sensors/temp", QoS::AtLeastOnce, b"22.5"),
        async move {
            let Packet::Publish(publish) = session.read_packet().await else {
                panic!("expected PUBLISH");
            };
            assert_eq!(publish.topic(), "sensors/temp");
            assert_eq!(publish.payload(), b"22.5");
            session
                .send(PublishAckPacket::new(publish.packet_id()))
                .await;
            session
        }
    );
    assert_eq!(publish_result.unwrap().reason_code, ReasonCode::Success);

    // Broker delivers a message matching the subscription.
    let mut inbound = PublishPacket::new("sensors/temp", QoS::AtLeastOnce, b"22.5").unwrap();
    inbound.set_packet_id(codec::PacketId::new(100));
    session.send(inbound).await;

    let (topic, payload, qos) = tokio::time::timeout(
        Duration::from_secs(2),
        message_rx.recv(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(topic, "sensors/temp");
    assert_eq!(payload, b"22.5");
    assert_eq!(qos, QoS::AtLeastOnce);

    // The client acknowledged the inbound QoS 1 delivery.
    let Packet::PublishAck(ack) = session.read_packet().await else {
        panic!("expected PUBACK from client");
    };
    assert_eq!(ack.packet_id().value(), 100);

    // No stray second delivery.
    assert!(message_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_subscribe_replace_keeps_single_entry() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = AsyncClient::new(test_options(broker.port()));

    let (connect_result, mut session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        session.handshake(false).await;
        session
    });
    connect_result.unwrap();

    for granted in [ReasonCode::Success, ReasonCode::GrantedQoS1] {
        let qos = if granted == ReasonCode::Success {
            QoS::AtMostOnce
        } else {
            QoS::AtLeastOnce
        };
        let (result, ()) = tokio::join!(client.subscribe("x/#", qos), async {
            let Packet::Subscribe(subscribe) = session.read_packet().await else {
                panic!("expected SUBSCRIBE");
            };
            session
                .send(SubscribeAckPacket::new(subscribe.packet_id(), granted))
                .await;
        });
        result.unwrap();
    }

    assert_eq!(client.subscriptions().len(), 1);
    assert_eq!(
        client.subscriptions().granted_qos("x/#"),
        Some(QoS::AtLeastOnce)
    );
}

#[tokio::test]
async fn test_qos0_publish_resolves_on_enqueue() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = AsyncClient::new(test_options(broker.port()));

    let (connect_result, mut session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        session.handshake(false).await;
        session
    });
    connect_result.unwrap();

    // Resolves without any broker acknowledgement.
    let result = client.publish("t", QoS::AtMostOnce, b"fire-and-forget").await;
    assert_eq!(result.unwrap().reason_code, ReasonCode::Success);
    assert_eq!(client.packet_ids_in_use(), 0);

    let Packet::Publish(publish) = session.read_packet().await else {
        panic!("expected PUBLISH");
    };
    assert_eq!(publish.qos(), QoS::AtMostOnce);
    assert_eq!(publish.packet_id().value(), 0);
}

#[tokio::test]
async fn test_user_disconnect_sends_disconnect_packet() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = AsyncClient::new(test_options(broker.port()));

    let (connect_result, mut session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        session.handshake(false).await;
        session
    });
    connect_result.unwrap();

    let (disconnect_result, ()) = tokio::join!(client.disconnect(), async {
        let Packet::Disconnect(disconnect) = session.read_packet().await else {
            panic!("expected DISCONNECT");
        };
        assert_eq!(disconnect.reason_code(), ReasonCode::Success);
    });
    disconnect_result.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Terminal: later operations fail locally.
    let err = client.publish("t", QoS::AtMostOnce, b"x").await.unwrap_err();
    assert_eq!(*err.kind(), lumo::ErrorKind::NotConnected);
}

#[tokio::test]
async fn test_malformed_inbound_packet_triggers_disconnect_0x81() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = AsyncClient::new(test_options(broker.port()));

    let (connect_result, mut session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        session.handshake(false).await;
        session
    });
    connect_result.unwrap();

    // Packet type nibble 0 is never valid.
    session.send_raw(&[0x00, 0x00]).await;

    let Packet::Disconnect(disconnect) = session.read_packet().await else {
        panic!("expected DISCONNECT");
    };
    assert_eq!(disconnect.reason_code(), ReasonCode::MalformedPacket);

    // Without auto-reconnect the client stays down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
