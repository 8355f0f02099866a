// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The connection task: dial, handshake, per-connection reader/writer/
//! keep-alive tasks, inbound dispatch, and the reconnect loop.

use codec::{
    check_frame, ByteReader, ConnectAckPacket, DecodePacket, DisconnectPacket, EncodePacket,
    FrameState, Packet, PacketId, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, QoS, ReasonCode, SubscribeAckPacket,
    UnsubscribeAckPacket,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::client::{ClientInner, ConnectResult};
use crate::commands::{ConnectReply, ConnectionCmd, ConnectionEvent};
use crate::error::{Error, ErrorKind};
use crate::events::EventSink;
use crate::inflight::{InflightResponse, PublishPhase, RecordKind};
use crate::keep_alive::{keep_alive_loop, KeepAliveState};
use crate::reconnect::{is_permanent_rejection, ReconnectBackoff};
use crate::session_state::ServerCapabilities;
use crate::status::ConnectionState;
use crate::stream::Stream;

const OUTBOUND_QUEUE_CAPACITY: usize = 64;
const EVENT_QUEUE_CAPACITY: usize = 64;
const READ_CHUNK_SIZE: usize = 4096;
const WRITER_FLUSH_WINDOW: Duration = Duration::from_secs(1);

/// Why one established connection ended.
enum ConnectionExit {
    UserDisconnect,
    ServerDisconnect(ReasonCode),
    Transport(Error),
    Malformed(Error),
    Protocol(Error),
    PingTimeout,
}

struct ConnectFailure {
    error: Error,
    /// Permanent failures stop the reconnect loop.
    permanent: bool,
}

impl ConnectFailure {
    fn transient(error: Error) -> Self {
        Self {
            error,
            permanent: false,
        }
    }
}

/// Entry point of the connection task; runs until the client disconnects
/// or a permanent failure ends the reconnect loop.
pub(crate) async fn connection_task(
    inner: Arc<ClientInner>,
    mut ctrl_rx: mpsc::UnboundedReceiver<ConnectionCmd>,
    connect_reply: ConnectReply,
) {
    let options = inner.options.clone();
    let mut backoff = ReconnectBackoff::new(
        options.reconnect_base_delay(),
        options.reconnect_max_delay(),
    );
    let mut connect_reply = Some(connect_reply);
    let mut first_attempt = true;

    loop {
        inner.status.set(ConnectionState::Connecting);
        let clean_start = if first_attempt {
            options.clean_start()
        } else {
            false
        };
        first_attempt = false;

        match establish(&inner, clean_start).await {
            Ok((stream, ack)) => {
                backoff.reset();
                reconcile_session(&inner, &ack);

                // The writer queue and the Connected state must be in
                // place before the connect future resolves, so requests
                // issued right after connect find a live connection.
                let (writer_tx, writer_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
                let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
                inner.outbound.set(writer_tx.clone());
                inner.status.set(ConnectionState::Connected);
                if let Some(reply) = connect_reply.take() {
                    let _ = reply.send(Ok(ConnectResult::from_ack(&inner, &ack)));
                }

                let exit = run_connection(
                    &inner,
                    stream,
                    &mut ctrl_rx,
                    writer_tx,
                    writer_rx,
                    event_tx,
                    event_rx,
                )
                .await;
                inner.status.set(ConnectionState::Disconnected);
                match exit {
                    ConnectionExit::UserDisconnect => {
                        fail_pending(
                            &inner,
                            Error::new(ErrorKind::DisconnectedByUser, "client disconnected"),
                        );
                        return;
                    }
                    ConnectionExit::ServerDisconnect(reason) => {
                        log::warn!("connection: server disconnect, reason {reason}");
                    }
                    ConnectionExit::Transport(err)
                    | ConnectionExit::Malformed(err)
                    | ConnectionExit::Protocol(err) => {
                        log::warn!("connection: lost, {err}");
                        inner.sink.after_disconnect(None);
                    }
                    ConnectionExit::PingTimeout => {
                        log::warn!("connection: keep-alive timeout");
                        inner.sink.after_disconnect(None);
                    }
                }

                if !options.automatic_reconnect() {
                    fail_pending(
                        &inner,
                        Error::new(ErrorKind::Transport, "connection lost"),
                    );
                    return;
                }
            }
            Err(failure) => {
                inner.status.set(ConnectionState::Disconnected);
                log::warn!("connection: attempt failed, {}", failure.error);
                if let Some(reply) = connect_reply.take() {
                    let _ = reply.send(Err(failure.error.clone()));
                }
                if failure.permanent || !options.automatic_reconnect() {
                    fail_pending(&inner, failure.error);
                    return;
                }
            }
        }

        // Back off before the next attempt; a user disconnect aborts the
        // loop even while sleeping.
        let delay = backoff.next_delay();
        log::info!("connection: reconnecting in {delay:?}");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            cmd = ctrl_rx.recv() => {
                if let Some(ConnectionCmd::Disconnect { reply, .. }) = cmd {
                    let _ = reply.send(Ok(()));
                }
                fail_pending(
                    &inner,
                    Error::new(ErrorKind::DisconnectedByUser, "client disconnected"),
                );
                return;
            }
        }
    }
}

/// Dial the broker and complete the CONNECT/CONNACK handshake.
async fn establish(
    inner: &Arc<ClientInner>,
    clean_start: bool,
) -> Result<(Stream, ConnectAckPacket), ConnectFailure> {
    let options = &inner.options;
    inner.sink.before_connect(options.client_id());

    let mut stream = timeout(
        options.connect_timeout(),
        Stream::connect(&options.address(), options.connect_type()),
    )
    .await
    .map_err(|elapsed| ConnectFailure::transient(elapsed.into()))?
    .map_err(ConnectFailure::transient)?;

    // A broker-assigned client id from an earlier CONNACK replaces the
    // configured one on later attempts.
    let assigned = inner.assigned_client_id.read().unwrap().clone();
    let connect_packet = match assigned {
        Some(client_id) => {
            let mut adopted = options.clone();
            adopted.set_client_id(&client_id);
            adopted.to_connect_packet(clean_start)
        }
        None => options.to_connect_packet(clean_start),
    }
    .map_err(|err| ConnectFailure {
        error: err,
        permanent: true,
    })?;
    let mut buf = Vec::new();
    connect_packet
        .encode(&mut buf)
        .map_err(|err| ConnectFailure {
            error: err.into(),
            permanent: true,
        })?;
    stream
        .write_all(&buf)
        .await
        .map_err(|err| ConnectFailure::transient(err.into()))?;
    inner
        .sink
        .on_packet_sent(&Packet::Connect(connect_packet));

    let ack = timeout(options.connect_timeout(), read_connect_ack(&mut stream))
        .await
        .map_err(|elapsed| ConnectFailure::transient(elapsed.into()))?
        .map_err(ConnectFailure::transient)?;
    inner
        .sink
        .on_packet_received(&Packet::ConnectAck(ack.clone()));
    inner.sink.after_connect(&ack);

    let reason_code = ack.reason_code();
    if !reason_code.is_success() {
        let permanent =
            is_permanent_rejection(reason_code, ack.properties().server_reference().is_some());
        return Err(ConnectFailure {
            error: Error::from_string(
                ErrorKind::ConnectRejected(reason_code),
                format!("broker rejected connect: {reason_code}"),
            ),
            permanent,
        });
    }
    Ok((stream, ack))
}

/// Read exactly one CONNACK off a fresh connection.
async fn read_connect_ack(stream: &mut Stream) -> Result<ConnectAckPacket, Error> {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = [0_u8; READ_CHUNK_SIZE];
    loop {
        if let FrameState::Complete { total } = check_frame(&buf)? {
            let mut reader = ByteReader::new(&buf[..total]);
            return match Packet::decode(&mut reader)? {
                Packet::ConnectAck(ack) => Ok(ack),
                other => Err(Error::from_string(
                    ErrorKind::ProtocolError,
                    format!("expected CONNACK, got {:?}", other.packet_type()),
                )),
            };
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::new(
                ErrorKind::Transport,
                "connection closed before CONNACK",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Adopt the CONNACK capabilities and reconcile session state.
fn reconcile_session(inner: &Arc<ClientInner>, ack: &ConnectAckPacket) {
    let capabilities = ServerCapabilities::from_connect_ack(ack);
    inner.inflight.set_capacity(capabilities.receive_maximum);
    *inner.capabilities.write().unwrap() = capabilities;

    if let Some(client_id) = ack.properties().assigned_client_identifier() {
        *inner.assigned_client_id.write().unwrap() = Some(client_id.to_string());
    }

    if !ack.session_present() {
        // The broker kept nothing: subscriptions are gone and inflight
        // deliveries can never complete.
        inner.subscriptions.clear();
        inner.inflight.inbound_clear();
        for (id, record) in inner.inflight.drain() {
            let _ = record.responder.send(Err(Error::new(
                ErrorKind::SessionLost,
                "broker resumed without session state",
            )));
            inner.allocator.release(PacketId::new(id));
        }
    }
}

/// Run one established connection to completion.
#[allow(clippy::too_many_lines)]
async fn run_connection(
    inner: &Arc<ClientInner>,
    stream: Stream,
    ctrl_rx: &mut mpsc::UnboundedReceiver<ConnectionCmd>,
    writer_tx: mpsc::Sender<Packet>,
    writer_rx: mpsc::Receiver<Packet>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    mut event_rx: mpsc::Receiver<ConnectionEvent>,
) -> ConnectionExit {
    let (read_half, write_half) = tokio::io::split(stream);
    let keep_alive_state = Arc::new(KeepAliveState::new());

    let writer_handle = tokio::spawn(writer_loop(
        write_half,
        writer_rx,
        Arc::clone(&keep_alive_state),
        Arc::clone(&inner.sink),
        event_tx.clone(),
    ));
    let reader_handle = tokio::spawn(reader_loop(
        read_half,
        Arc::clone(&inner.sink),
        event_tx.clone(),
    ));

    // The server may dictate its own keep-alive [MQTT-3.2.2-21].
    let keep_alive = inner
        .capabilities
        .read()
        .unwrap()
        .server_keep_alive
        .map_or(inner.options.keep_alive(), |seconds| {
            Duration::from_secs(u64::from(seconds))
        });
    let keep_alive_handle = tokio::spawn(keep_alive_loop(
        keep_alive,
        Arc::clone(&keep_alive_state),
        writer_tx.clone(),
        event_tx.clone(),
    ));

    // Session present: push unfinished QoS 1/2 deliveries out again.
    for packet in inner.inflight.retransmit_packets() {
        if writer_tx.send(packet).await.is_err() {
            break;
        }
    }

    let exit = loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break ConnectionExit::Transport(Error::new(
                        ErrorKind::Transport,
                        "connection tasks ended",
                    ));
                };
                match event {
                    ConnectionEvent::PacketReceived(packet) => {
                        if let Some(exit) = dispatch(inner, &writer_tx, &keep_alive_state, packet).await {
                            break exit;
                        }
                    }
                    ConnectionEvent::TransportFailed(err) => {
                        break ConnectionExit::Transport(err);
                    }
                    ConnectionEvent::MalformedPacket(err) => {
                        // A malformed inbound packet requires DISCONNECT
                        // 0x81 before dropping the connection.
                        let disconnect =
                            DisconnectPacket::with_reason(ReasonCode::MalformedPacket);
                        let _ = writer_tx.send(Packet::Disconnect(disconnect)).await;
                        break ConnectionExit::Malformed(err);
                    }
                    ConnectionEvent::PingTimeout => {
                        break ConnectionExit::PingTimeout;
                    }
                }
            }
            cmd = ctrl_rx.recv() => {
                match cmd {
                    Some(ConnectionCmd::Disconnect { reason, reply }) => {
                        inner.status.set(ConnectionState::Disconnecting);
                        let disconnect = DisconnectPacket::with_reason(reason);
                        let _ = writer_tx.send(Packet::Disconnect(disconnect)).await;
                        inner.sink.after_disconnect(Some(reason));
                        let _ = reply.send(Ok(()));
                        break ConnectionExit::UserDisconnect;
                    }
                    None => break ConnectionExit::UserDisconnect,
                }
            }
        }
    };

    inner.outbound.clear();
    keep_alive_handle.abort();
    reader_handle.abort();
    // Dropping the last sender lets the writer drain its queue, flush
    // and shut the socket down.
    drop(writer_tx);
    drop(event_tx);
    let _ = timeout(WRITER_FLUSH_WINDOW, writer_handle).await;
    exit
}

/// Route one inbound packet. Returns the connection exit when the packet
/// ends the connection.
async fn dispatch(
    inner: &Arc<ClientInner>,
    writer_tx: &mpsc::Sender<Packet>,
    keep_alive_state: &Arc<KeepAliveState>,
    packet: Packet,
) -> Option<ConnectionExit> {
    match packet {
        Packet::Publish(publish) => {
            handle_publish(inner, writer_tx, publish).await;
            None
        }
        Packet::PublishAck(ack) => {
            complete_publish(
                inner,
                ack.packet_id(),
                ack.reason_code(),
                ack.properties().reason_string().map(str::to_string),
                PublishPhase::AwaitingPubAck,
            );
            None
        }
        Packet::PublishReceived(received) => {
            handle_publish_received(inner, writer_tx, &received).await
        }
        Packet::PublishRelease(release) => {
            // PUBCOMP goes out whether or not the id is known; a repeat
            // PUBREL after a lost PUBCOMP must still be answered.
            let id = release.packet_id();
            if !inner.inflight.inbound_remove(id.value()) {
                log::debug!("dispatch: PUBREL for unknown id {id}");
            }
            let pubcomp = Packet::PublishComplete(PublishCompletePacket::new(id));
            let _ = writer_tx.send(pubcomp).await;
            None
        }
        Packet::PublishComplete(complete) => {
            complete_publish(
                inner,
                complete.packet_id(),
                complete.reason_code(),
                complete.properties().reason_string().map(str::to_string),
                PublishPhase::AwaitingPubComp,
            );
            None
        }
        Packet::SubscribeAck(ack) => {
            handle_subscribe_ack(inner, ack);
            None
        }
        Packet::UnsubscribeAck(ack) => {
            handle_unsubscribe_ack(inner, ack);
            None
        }
        Packet::PingResponse(_) => {
            keep_alive_state.on_ping_response();
            None
        }
        Packet::Disconnect(disconnect) => {
            inner
                .sink
                .after_disconnect(Some(disconnect.reason_code()));
            Some(ConnectionExit::ServerDisconnect(disconnect.reason_code()))
        }
        Packet::Auth(auth) => {
            // Enhanced re-authentication is driven by the application;
            // the exchange is visible through the packet events.
            log::info!("dispatch: AUTH, reason {}", auth.reason_code());
            None
        }
        other => {
            let error = Error::from_string(
                ErrorKind::ProtocolError,
                format!("server sent {:?}", other.packet_type()),
            );
            Some(protocol_exit(writer_tx, error).await)
        }
    }
}

/// DISCONNECT 0x82, then surface the protocol error.
async fn protocol_exit(writer_tx: &mpsc::Sender<Packet>, error: Error) -> ConnectionExit {
    log::error!("dispatch: {error}");
    let disconnect = DisconnectPacket::with_reason(ReasonCode::ProtocolError);
    let _ = writer_tx.send(Packet::Disconnect(disconnect)).await;
    ConnectionExit::Protocol(error)
}

async fn handle_publish(
    inner: &Arc<ClientInner>,
    writer_tx: &mpsc::Sender<Packet>,
    publish: PublishPacket,
) {
    match publish.qos() {
        QoS::AtMostOnce => deliver(inner, &publish),
        QoS::AtLeastOnce => {
            deliver(inner, &publish);
            let puback = Packet::PublishAck(PublishAckPacket::new(publish.packet_id()));
            let _ = writer_tx.send(puback).await;
        }
        QoS::ExactOnce => {
            let id = publish.packet_id();
            // Redeliveries of an id already handed to the application
            // are acknowledged but not delivered again.
            if inner.inflight.inbound_insert(id.value()) {
                deliver(inner, &publish);
            } else {
                log::debug!("dispatch: suppressing duplicate QoS 2 publish {id}");
            }
            let pubrec = Packet::PublishReceived(PublishReceivedPacket::new(id));
            let _ = writer_tx.send(pubrec).await;
        }
    }
}

/// Per-filter handlers first, then the global observers, then the sink.
fn deliver(inner: &Arc<ClientInner>, publish: &PublishPacket) {
    inner.subscriptions.dispatch(publish);
    inner.observers.notify(publish);
    inner.sink.on_message_received(publish);
}

async fn handle_publish_received(
    inner: &Arc<ClientInner>,
    writer_tx: &mpsc::Sender<Packet>,
    received: &PublishReceivedPacket,
) -> Option<ConnectionExit> {
    let id = received.packet_id();
    if !received.reason_code().is_success() {
        // The delivery failed at the broker; surface the reason and
        // stop the QoS 2 flow here.
        complete_publish(
            inner,
            id,
            received.reason_code(),
            received.properties().reason_string().map(str::to_string),
            PublishPhase::AwaitingPubRec,
        );
        return None;
    }

    let pubrel = Packet::PublishRelease(PublishReleasePacket::new(id));
    if inner.inflight.transition_to_pubcomp(id.value(), pubrel.clone()) {
        let _ = writer_tx.send(pubrel).await;
        None
    } else {
        let error = Error::from_string(
            ErrorKind::ProtocolError,
            format!("PUBREC {id} without matching publish"),
        );
        Some(protocol_exit(writer_tx, error).await)
    }
}

/// Resolve an outbound publish on its terminal acknowledgement.
fn complete_publish(
    inner: &Arc<ClientInner>,
    id: PacketId,
    reason_code: ReasonCode,
    reason_string: Option<String>,
    expected_phase: PublishPhase,
) {
    let Some(record) = inner.inflight.remove(id.value()) else {
        log::warn!("dispatch: ack for unknown packet id {id}");
        return;
    };
    inner.allocator.release(id);
    if record.phase != Some(expected_phase) {
        log::warn!(
            "dispatch: packet id {id} acked in phase {:?}, expected {expected_phase:?}",
            record.phase
        );
    }
    let _ = record.responder.send(Ok(InflightResponse::Publish {
        reason_code,
        reason_string,
    }));
    // Dropping the record releases its Receive Maximum permit.
}

fn handle_subscribe_ack(inner: &Arc<ClientInner>, ack: SubscribeAckPacket) {
    let Some(record) = inner.inflight.remove(ack.packet_id().value()) else {
        log::warn!("dispatch: SUBACK for unknown packet id {}", ack.packet_id());
        return;
    };
    inner.allocator.release(ack.packet_id());

    if let RecordKind::Subscribe { filters } = &record.kind {
        for (filter, reason) in filters.iter().zip(ack.reasons()) {
            if reason.is_success() {
                let granted = match reason {
                    ReasonCode::GrantedQoS1 => QoS::AtLeastOnce,
                    ReasonCode::GrantedQoS2 => QoS::ExactOnce,
                    _ => QoS::AtMostOnce,
                };
                inner.subscriptions.set_granted(filter, granted);
            } else {
                log::warn!("dispatch: subscription to {filter} rejected, {reason}");
                let _ = inner.subscriptions.remove(filter);
            }
        }
    }
    inner.sink.after_subscribe(&ack);
    let _ = record.responder.send(Ok(InflightResponse::Subscribe(ack)));
}

fn handle_unsubscribe_ack(inner: &Arc<ClientInner>, ack: UnsubscribeAckPacket) {
    let Some(record) = inner.inflight.remove(ack.packet_id().value()) else {
        log::warn!(
            "dispatch: UNSUBACK for unknown packet id {}",
            ack.packet_id()
        );
        return;
    };
    inner.allocator.release(ack.packet_id());

    if let RecordKind::Unsubscribe { filters } = &record.kind {
        for (filter, reason) in filters.iter().zip(ack.reasons()) {
            if reason.is_success() {
                let _ = inner.subscriptions.remove(filter);
            } else {
                log::warn!("dispatch: unsubscribe of {filter} rejected, {reason}");
            }
        }
    }
    inner.sink.after_unsubscribe(&ack);
    let _ = record.responder.send(Ok(InflightResponse::Unsubscribe(ack)));
}

/// Fail every pending request; used on terminal teardown.
fn fail_pending(inner: &Arc<ClientInner>, error: Error) {
    for (id, record) in inner.inflight.drain() {
        let _ = record.responder.send(Err(error.clone()));
        inner.allocator.release(PacketId::new(id));
    }
}

/// Serialize packets off the FIFO queue onto the transport.
async fn writer_loop(
    mut write_half: WriteHalf<Stream>,
    mut writer_rx: mpsc::Receiver<Packet>,
    keep_alive_state: Arc<KeepAliveState>,
    sink: Arc<dyn EventSink>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut buf = Vec::with_capacity(READ_CHUNK_SIZE);
    while let Some(packet) = writer_rx.recv().await {
        buf.clear();
        if let Err(err) = packet.encode(&mut buf) {
            log::error!("writer: failed to encode {:?}: {err}", packet.packet_type());
            continue;
        }
        if let Err(err) = write_half.write_all(&buf).await {
            let _ = event_tx
                .send(ConnectionEvent::TransportFailed(err.into()))
                .await;
            return;
        }
        keep_alive_state.touch();
        sink.on_packet_sent(&packet);
    }
    // Queue closed on teardown: flush what was written and shut down.
    let _ = write_half.shutdown().await;
}

/// Frame packets off the transport and hand them to the dispatch loop.
async fn reader_loop(
    mut read_half: ReadHalf<Stream>,
    sink: Arc<dyn EventSink>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = [0_u8; READ_CHUNK_SIZE];
    loop {
        loop {
            match check_frame(&buf) {
                Ok(FrameState::Complete { total }) => {
                    let mut reader = ByteReader::new(&buf[..total]);
                    match Packet::decode(&mut reader) {
                        Ok(packet) => {
                            sink.on_packet_received(&packet);
                            if event_tx
                                .send(ConnectionEvent::PacketReceived(packet))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(err) => {
                            let _ = event_tx
                                .send(ConnectionEvent::MalformedPacket(err.into()))
                                .await;
                            return;
                        }
                    }
                    buf.drain(..total);
                }
                Ok(FrameState::Partial) => break,
                Err(err) => {
                    let _ = event_tx
                        .send(ConnectionEvent::MalformedPacket(err.into()))
                        .await;
                    return;
                }
            }
        }

        match read_half.read(&mut chunk).await {
            Ok(0) => {
                let _ = event_tx
                    .send(ConnectionEvent::TransportFailed(Error::new(
                        ErrorKind::Transport,
                        "connection closed by peer",
                    )))
                    .await;
                return;
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) => {
                let _ = event_tx
                    .send(ConnectionEvent::TransportFailed(err.into()))
                    .await;
                return;
            }
        }
    }
}
