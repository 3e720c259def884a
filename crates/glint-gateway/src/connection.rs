use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use glint_types::events::{GatewayCommand, GatewayEvent};
use glint_types::{CoreResult, UserId};

use crate::Gateway;
use crate::presence::ConnectionHandle;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.name(), e);
            None
        }
    }
}

/// Handle a pre-authenticated WebSocket connection.
/// The JWT was already validated at the HTTP upgrade layer, so the
/// connection goes straight to Ready + event loop.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, user_id: UserId, username: String) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut events_rx) = gateway.dispatcher.connect(user_id).await;

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        connection_id: handle.id,
    };
    let Some(ready) = encode(&ready) else {
        gateway.disconnect(&handle).await;
        return;
    };
    if sender.send(ready).await.is_err() {
        gateway.disconnect(&handle).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(msg) = encode(&event) else { continue };
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_gateway = gateway.clone();
    let recv_handle = handle.clone();
    let recv_username = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => dispatch_command(&recv_gateway, &recv_handle, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_username,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        recv_handle.send(GatewayEvent::Error {
                            code: "bad_request".to_string(),
                            message: e.to_string(),
                            command: None,
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.disconnect(&handle).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Runs one command and reports a failure to the issuing connection only.
pub async fn dispatch_command(gateway: &Gateway, handle: &ConnectionHandle, cmd: GatewayCommand) {
    let name = cmd.name();
    if let Err(e) = handle_command(gateway, handle, cmd).await {
        if e.is_short_circuit() {
            debug!("{} from {} short-circuited: {}", name, handle.user_id, e);
            return;
        }
        if e.is_retryable() {
            warn!("{} from {} failed: {}", name, handle.user_id, e);
        } else {
            debug!("{} from {} rejected: {}", name, handle.user_id, e);
        }
        handle.send(GatewayEvent::error(&e, Some(name)));
    }
}

pub async fn handle_command(gateway: &Gateway, handle: &ConnectionHandle, cmd: GatewayCommand) -> CoreResult<()> {
    let user_id = handle.user_id;

    match cmd {
        GatewayCommand::JoinLive { stream_id, .. } => {
            gateway.rooms.join_room(stream_id, handle).await?;
        }

        GatewayCommand::LeaveLive { stream_id, .. } => {
            gateway.rooms.leave_room(stream_id, handle).await?;
        }

        GatewayCommand::RequestToJoin { stream_id, .. } => {
            gateway.negotiator.request_to_join(stream_id, handle).await?;
        }

        GatewayCommand::RespondJoinRequest {
            stream_id,
            requester_id,
            accepted,
        } => {
            gateway
                .negotiator
                .respond_to_request(stream_id, user_id, requester_id, accepted)
                .await?;
        }

        GatewayCommand::LeaveCoBroadcast { stream_id, .. } => {
            gateway.negotiator.leave_co_broadcast(stream_id, user_id).await?;
        }

        GatewayCommand::SendGift {
            stream_id,
            gift_id,
            amount,
            ..
        } => {
            gateway.gifts.send_gift(stream_id, user_id, gift_id, amount).await?;
        }

        GatewayCommand::SendComment { stream_id, text } => {
            gateway.rooms.send_comment(stream_id, user_id, &text).await?;
        }

        GatewayCommand::UpdateStreamStatus {
            stream_id,
            muted,
            video_off,
        } => {
            gateway
                .rooms
                .update_stream_status(stream_id, user_id, muted, video_off)
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;

    use glint_db::Database;
    use glint_types::StreamId;
    use glint_types::models::MediaKind;

    use super::*;

    const HOST: UserId = UserId(1);
    const VIEWER: UserId = UserId(2);

    async fn setup() -> (Gateway, StreamId) {
        let db = Database::open_in_memory().unwrap();
        db.create_user(HOST, "Host", "host", 0).unwrap();
        db.create_user(VIEWER, "Viewer", "viewer", 10).unwrap();
        let gateway = Gateway::new(Arc::new(db));
        let stream = gateway.rooms.start_stream(HOST, MediaKind::Audio, None).await.unwrap();
        (gateway, stream.id)
    }

    fn drain(rx: &mut UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn command(raw: &str) -> GatewayCommand {
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn errors_go_only_to_the_issuing_connection() {
        let (gateway, stream) = setup().await;
        let (phone, mut phone_rx) = gateway.dispatcher.connect(VIEWER).await;
        let (_laptop, mut laptop_rx) = gateway.dispatcher.connect(VIEWER).await;

        let raw = format!(
            r#"{{"type":"send_gift","data":{{"stream_id":"{}","gift_id":3,"coins":30}}}}"#,
            stream
        );
        dispatch_command(&gateway, &phone, command(&raw)).await;

        match drain(&mut phone_rx).as_slice() {
            [GatewayEvent::Error { code, command, .. }] => {
                assert_eq!(code, "insufficient_balance");
                assert_eq!(command.as_deref(), Some("send_gift"));
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert!(drain(&mut laptop_rx).is_empty());
    }

    #[tokio::test]
    async fn duplicate_join_reports_nothing() {
        let (gateway, stream) = setup().await;
        let (conn, mut rx) = gateway.dispatcher.connect(VIEWER).await;
        let raw = format!(r#"{{"type":"join_live","data":{{"stream_id":{}}}}}"#, stream);

        dispatch_command(&gateway, &conn, command(&raw)).await;
        drain(&mut rx);
        dispatch_command(&gateway, &conn, command(&raw)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn disconnect_counts_as_leaving() {
        let (gateway, stream) = setup().await;
        let (host, mut host_rx) = gateway.dispatcher.connect(HOST).await;
        let (viewer, _viewer_rx) = gateway.dispatcher.connect(VIEWER).await;

        let raw = format!(r#"{{"type":"join_live","data":{{"stream_id":{{"id":{}}}}}}}"#, stream);
        handle_command(&gateway, &host, command(&raw)).await.unwrap();
        handle_command(&gateway, &viewer, command(&raw)).await.unwrap();
        drain(&mut host_rx);

        gateway.disconnect(&viewer).await;
        assert!(matches!(
            drain(&mut host_rx).as_slice(),
            [GatewayEvent::ViewerCountUpdated { count: 1, .. }]
        ));
    }

    #[tokio::test]
    async fn only_the_host_may_answer_requests() {
        let (gateway, stream) = setup().await;
        let (viewer, _rx) = gateway.dispatcher.connect(VIEWER).await;
        let raw = format!(
            r#"{{"type":"respond_join_request","data":{{"stream_id":{},"requester_id":"2","accepted":true}}}}"#,
            stream
        );
        assert_eq!(
            handle_command(&gateway, &viewer, command(&raw)).await.unwrap_err(),
            glint_types::CoreError::Forbidden
        );
    }
}
