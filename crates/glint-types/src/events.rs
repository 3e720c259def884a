use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageView;
use crate::error::CoreError;
use crate::ids::{ConnectionId, StreamId, UserId};
use crate::models::{Gift, UserProfile};

/// Commands sent FROM client TO server over WebSocket.
///
/// The `host_id` fields are informational: the host is always resolved from
/// the stream record, never trusted from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    JoinLive {
        stream_id: StreamId,
        #[serde(default, alias = "broadcaster_id")]
        host_id: Option<UserId>,
    },

    LeaveLive {
        stream_id: StreamId,
        #[serde(default, alias = "broadcaster_id")]
        host_id: Option<UserId>,
    },

    RequestToJoin {
        stream_id: StreamId,
        #[serde(default, alias = "broadcaster_id")]
        host_id: Option<UserId>,
    },

    RespondJoinRequest {
        stream_id: StreamId,
        requester_id: UserId,
        accepted: bool,
    },

    LeaveCoBroadcast {
        stream_id: StreamId,
        #[serde(default, alias = "broadcaster_id")]
        host_id: Option<UserId>,
    },

    SendGift {
        stream_id: StreamId,
        #[serde(default, alias = "broadcaster_id")]
        host_id: Option<UserId>,
        gift_id: i64,
        #[serde(alias = "coins")]
        amount: i64,
    },

    SendComment {
        stream_id: StreamId,
        text: String,
    },

    UpdateStreamStatus {
        stream_id: StreamId,
        #[serde(default)]
        muted: bool,
        #[serde(default)]
        video_off: bool,
    },
}

impl GatewayCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinLive { .. } => "join_live",
            Self::LeaveLive { .. } => "leave_live",
            Self::RequestToJoin { .. } => "request_to_join",
            Self::RespondJoinRequest { .. } => "respond_join_request",
            Self::LeaveCoBroadcast { .. } => "leave_co_broadcast",
            Self::SendGift { .. } => "send_gift",
            Self::SendComment { .. } => "send_comment",
            Self::UpdateStreamStatus { .. } => "update_stream_status",
        }
    }
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready {
        user_id: UserId,
        connection_id: ConnectionId,
    },

    ViewerCountUpdated {
        stream_id: StreamId,
        count: i64,
    },

    /// Sent only to the joining connection
    JoinLiveSuccess {
        stream_id: StreamId,
        host_id: UserId,
        viewer_count: i64,
        co_broadcasters: Vec<UserId>,
    },

    NewViewerJoined {
        stream_id: StreamId,
        viewer: UserProfile,
    },

    JoinRequestReceived {
        stream_id: StreamId,
        requester: UserProfile,
        timestamp: DateTime<Utc>,
    },

    JoinRequestSent {
        stream_id: StreamId,
        host_id: UserId,
    },

    JoinRequestAccepted {
        stream_id: StreamId,
        host_id: UserId,
        timestamp: DateTime<Utc>,
    },

    JoinRequestRejected {
        stream_id: StreamId,
        host_id: UserId,
        timestamp: DateTime<Utc>,
    },

    CoBroadcasterAdded {
        stream_id: StreamId,
        user_id: UserId,
    },

    CoBroadcasterRemoved {
        stream_id: StreamId,
        user_id: UserId,
    },

    /// Delivered to the host; carries the host's resulting balance
    GiftReceived {
        stream_id: StreamId,
        transaction_id: Uuid,
        sender: UserProfile,
        gift: Gift,
        amount: i64,
        balance: i64,
        timestamp: DateTime<Utc>,
    },

    /// Delivered to the sender; carries the sender's resulting balance
    GiftSent {
        stream_id: StreamId,
        transaction_id: Uuid,
        gift_id: i64,
        amount: i64,
        balance: i64,
    },

    /// Public room notification, no balances
    GiftSentNotification {
        stream_id: StreamId,
        sender: UserProfile,
        gift: Gift,
        amount: i64,
        timestamp: DateTime<Utc>,
    },

    NewComment {
        stream_id: StreamId,
        comment_id: Uuid,
        user: UserProfile,
        text: String,
        timestamp: DateTime<Utc>,
    },

    StreamStatusChanged {
        stream_id: StreamId,
        host_id: UserId,
        muted: bool,
        video_off: bool,
    },

    StreamEnded {
        stream_id: StreamId,
        host_id: UserId,
    },

    /// The message as its receiver sees it, with both profiles filled in.
    MessageReceived {
        conversation_id: Uuid,
        message: MessageView,
    },

    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },
}

impl GatewayEvent {
    pub fn error(err: &CoreError, command: Option<&str>) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            command: command.map(str::to_string),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::ViewerCountUpdated { .. } => "viewer_count_updated",
            Self::JoinLiveSuccess { .. } => "join_live_success",
            Self::NewViewerJoined { .. } => "new_viewer_joined",
            Self::JoinRequestReceived { .. } => "join_request_received",
            Self::JoinRequestSent { .. } => "join_request_sent",
            Self::JoinRequestAccepted { .. } => "join_request_accepted",
            Self::JoinRequestRejected { .. } => "join_request_rejected",
            Self::CoBroadcasterAdded { .. } => "co_broadcaster_added",
            Self::CoBroadcasterRemoved { .. } => "co_broadcaster_removed",
            Self::GiftReceived { .. } => "gift_received",
            Self::GiftSent { .. } => "gift_sent",
            Self::GiftSentNotification { .. } => "gift_sent_notification",
            Self::NewComment { .. } => "new_comment",
            Self::StreamStatusChanged { .. } => "stream_status_changed",
            Self::StreamEnded { .. } => "stream_ended",
            Self::MessageReceived { .. } => "message_received",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_accept_loose_identity_representations() {
        let raw = r#"{"type":"send_gift","data":{"stream_id":"12","broadcaster_id":5,"gift_id":3,"coins":30}}"#;
        match serde_json::from_str::<GatewayCommand>(raw).unwrap() {
            GatewayCommand::SendGift {
                stream_id,
                host_id,
                gift_id,
                amount,
            } => {
                assert_eq!(stream_id, StreamId(12));
                assert_eq!(host_id, Some(UserId(5)));
                assert_eq!(gift_id, 3);
                assert_eq!(amount, 30);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn events_use_snake_case_tags() {
        let event = GatewayEvent::ViewerCountUpdated {
            stream_id: StreamId(1),
            count: 4,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "viewer_count_updated");
        assert_eq!(json["data"]["count"], 4);
        assert_eq!(event.name(), "viewer_count_updated");
    }

    #[test]
    fn error_event_carries_stable_code() {
        let event = GatewayEvent::error(&CoreError::HostUnavailable, Some("request_to_join"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["code"], "host_unavailable");
        assert_eq!(json["data"]["command"], "request_to_join");
    }
}
