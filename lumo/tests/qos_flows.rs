// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use codec::{
    ConnectAckPacket, Packet, PacketId, Property, PublishAckPacket, PublishCompletePacket,
    PublishPacket, PublishReleasePacket, QoS, ReasonCode, U16Data,
};
use common::{test_options, MockBroker};
use lumo::AsyncClient;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_qos2_full_handshake() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = Arc::new(AsyncClient::new(test_options(broker.port())));

    let (connect_result, mut session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        session.handshake(false).await;
        session
    });
    connect_result.unwrap();

    let publisher = Arc::clone(&client);
    let publish_task =
        tokio::spawn(async move { publisher.publish("t/qos2", QoS::ExactOnce, b"x").await });

    // Exactly one PUBLISH, then PUBREC, PUBREL, PUBCOMP in order.
    let Packet::Publish(publish) = session.read_packet().await else {
        panic!("expected PUBLISH");
    };
    assert_eq!(publish.qos(), QoS::ExactOnce);
    let id = publish.packet_id();
    assert_ne!(id.value(), 0);

    // The future must not resolve before PUBCOMP.
    assert!(!publish_task.is_finished());

    session
        .send(codec::PublishReceivedPacket::new(id))
        .await;
    let Packet::PublishRelease(release) = session.read_packet().await else {
        panic!("expected PUBREL");
    };
    assert_eq!(release.packet_id(), id);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!publish_task.is_finished(), "resolved before PUBCOMP");

    session.send(PublishCompletePacket::new(id)).await;
    let result = publish_task.await.unwrap().unwrap();
    assert_eq!(result.reason_code, ReasonCode::Success);

    // The identifier went back to the allocator.
    assert_eq!(client.packet_ids_in_use(), 0);
}

#[tokio::test]
async fn test_receive_maximum_backpressure() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = Arc::new(AsyncClient::new(test_options(broker.port())));

    let (connect_result, mut session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        let mut ack = ConnectAckPacket::new(false, ReasonCode::Success);
        ack.properties_mut()
            .push(Property::ReceiveMaximum(U16Data::new(3)))
            .unwrap();
        session.handshake_with(ack).await;
        session
    });
    let connect_result = connect_result.unwrap();
    assert_eq!(connect_result.capabilities.receive_maximum, 3);

    let mut tasks = Vec::new();
    for index in 0..5_u8 {
        let publisher = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            publisher
                .publish("load", QoS::AtLeastOnce, &[index])
                .await
        }));
    }

    // Only three make it onto the wire while no acks flow.
    let mut outstanding = Vec::new();
    for _ in 0..3 {
        let Packet::Publish(publish) = session.read_packet().await else {
            panic!("expected PUBLISH");
        };
        outstanding.push(publish.packet_id());
    }
    assert!(
        session
            .try_read_packet(Duration::from_millis(150))
            .await
            .is_none(),
        "fourth publish leaked past the receive maximum"
    );

    // Each ack admits exactly one more.
    for _ in 0..2 {
        let id = outstanding.remove(0);
        session.send(PublishAckPacket::new(id)).await;
        let Packet::Publish(publish) = session.read_packet().await else {
            panic!("expected PUBLISH");
        };
        outstanding.push(publish.packet_id());
        assert!(
            session
                .try_read_packet(Duration::from_millis(100))
                .await
                .is_none()
        );
    }

    for id in outstanding {
        session.send(PublishAckPacket::new(id)).await;
    }
    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.reason_code, ReasonCode::Success);
    }
    assert_eq!(client.packet_ids_in_use(), 0);
}

#[tokio::test]
async fn test_inbound_qos2_duplicate_delivered_once() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = AsyncClient::new(test_options(broker.port()));

    let (connect_result, mut session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        session.handshake(false).await;
        session
    });
    connect_result.unwrap();

    let (message_tx, mut message_rx) = tokio::sync::mpsc::unbounded_channel();
    client.on_message(Arc::new(move |publish| {
        let _ = message_tx.send(publish.payload().to_vec());
    }));

    let id = PacketId::new(21);
    let mut publish = PublishPacket::new("exact", QoS::ExactOnce, b"once").unwrap();
    publish.set_packet_id(id);
    session.send(publish.clone()).await;

    let Packet::PublishReceived(received) = session.read_packet().await else {
        panic!("expected PUBREC");
    };
    assert_eq!(received.packet_id(), id);

    // Retransmission with the dup flag before PUBREL: acknowledged but
    // not redelivered.
    let mut duplicate = publish.clone();
    duplicate.set_dup(true).unwrap();
    session.send(duplicate).await;
    let Packet::PublishReceived(_) = session.read_packet().await else {
        panic!("expected second PUBREC");
    };

    session.send(PublishReleasePacket::new(id)).await;
    let Packet::PublishComplete(complete) = session.read_packet().await else {
        panic!("expected PUBCOMP");
    };
    assert_eq!(complete.packet_id(), id);

    let first = tokio::time::timeout(Duration::from_secs(1), message_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, b"once");
    assert!(message_rx.try_recv().is_err(), "duplicate was redelivered");

    // A repeat PUBREL after the flow finished is still answered.
    session.send(PublishReleasePacket::new(id)).await;
    let Packet::PublishComplete(_) = session.read_packet().await else {
        panic!("expected idempotent PUBCOMP");
    };
}

#[tokio::test]
async fn test_retain_rejected_when_unavailable() {
    common::init_log();
    let broker = MockBroker::bind().await;
    let client = AsyncClient::new(test_options(broker.port()));

    let (connect_result, _session) = tokio::join!(client.connect(), async {
        let mut session = broker.accept().await;
        let mut ack = ConnectAckPacket::new(false, ReasonCode::Success);
        ack.properties_mut()
            .push(Property::RetainAvailable(codec::BoolData::new(false)))
            .unwrap();
        session.handshake_with(ack).await;
        session
    });
    connect_result.unwrap();

    let mut packet = PublishPacket::new("t", QoS::AtMostOnce, b"x").unwrap();
    packet.set_retain(true);
    let err = client
        .publish_packet(packet, &lumo::CancelToken::never())
        .await
        .unwrap_err();
    assert_eq!(*err.kind(), lumo::ErrorKind::CapabilityViolation);

    // Nothing went on the wire and no id was taken.
    assert_eq!(client.packet_ids_in_use(), 0);
}
