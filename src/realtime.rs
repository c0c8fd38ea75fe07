// Realtime change-feed subscriber for one session.
//
// The backend pushes row-level changes over a Phoenix-style websocket: the
// client joins a topic scoped to the session id with a `postgres_changes`
// subscription, keeps the channel alive with heartbeats, and decodes server
// pushes into typed `ChangeEvent`s at this boundary. Delivery is
// at-least-once and unordered across concurrent writers; missed-event
// recovery after a reconnect is signalled to the caller (`Resynced`), which
// re-fetches a snapshot rather than trying to reconstruct ordering.

use std::time::Duration;

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::session::model::{Bid, ChangeEvent, ConnectionStatus, Participant};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Keep-alive cadence. The server drops channels that go quiet for ~60s.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Reconnect backoff bounds.
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// The join message always uses this ref; heartbeat refs count up from 2.
const JOIN_REF: &str = "1";

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Events emitted by the subscriber to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Connectivity transition for the status indicator and the store.
    Status(ConnectionStatus),
    /// One decoded row change.
    Change(ChangeEvent),
    /// The channel was re-joined after a drop. Events may have been missed
    /// while disconnected, so the caller must re-fetch a snapshot.
    Resynced,
}

/// One message decoded from the wire, before it is routed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ServerMessage {
    /// Reply to a message we sent, identified by its ref.
    Reply { reference: String, ok: bool },
    /// A row-level change push.
    Change(ChangeEvent),
    /// Anything else (system notices, presence, heartbeat acks without refs).
    Other,
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Derive the realtime websocket URL from the backend base URL.
pub fn websocket_url(base_url: &str, anon_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{base}")
    };
    format!("{ws_base}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0")
}

/// Topic for one session's channel.
pub(crate) fn session_topic(session_id: &str) -> String {
    format!("realtime:session-{session_id}")
}

/// Build the channel-join message: subscribe to all participant changes and
/// bid inserts for this session.
pub(crate) fn join_message(session_id: &str) -> String {
    json!({
        "topic": session_topic(session_id),
        "event": "phx_join",
        "payload": {
            "config": {
                "postgres_changes": [
                    {
                        "event": "*",
                        "schema": "public",
                        "table": "participants",
                        "filter": format!("session_id=eq.{session_id}"),
                    },
                    {
                        "event": "INSERT",
                        "schema": "public",
                        "table": "bids",
                        "filter": format!("session_id=eq.{session_id}"),
                    },
                ]
            }
        },
        "ref": JOIN_REF,
    })
    .to_string()
}

/// Build a heartbeat message with the given ref.
pub(crate) fn heartbeat_message(reference: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
    .to_string()
}

/// Decode one text frame from the server. Returns `None` for frames that
/// aren't valid JSON envelopes at all.
pub(crate) fn parse_server_message(text: &str) -> Option<ServerMessage> {
    let envelope: Value = serde_json::from_str(text).ok()?;
    let event = envelope.get("event")?.as_str()?;

    match event {
        "phx_reply" => {
            let reference = envelope
                .get("ref")
                .and_then(|r| r.as_str())
                .unwrap_or_default()
                .to_string();
            let ok = envelope
                .pointer("/payload/status")
                .and_then(|s| s.as_str())
                .is_some_and(|s| s == "ok");
            Some(ServerMessage::Reply { reference, ok })
        }
        "postgres_changes" => {
            let data = envelope.pointer("/payload/data")?;
            match parse_change(data) {
                Some(change) => Some(ServerMessage::Change(change)),
                None => {
                    warn!("unhandled postgres_changes payload: {data}");
                    Some(ServerMessage::Other)
                }
            }
        }
        _ => Some(ServerMessage::Other),
    }
}

/// Decode the `data` object of a postgres_changes push into a typed change.
///
/// Participant inserts/updates carry the full new row; deletes only carry the
/// replica identity (the id) in `old_record`. Bid events are insert-only.
pub(crate) fn parse_change(data: &Value) -> Option<ChangeEvent> {
    let table = data.get("table")?.as_str()?;
    let kind = data.get("type")?.as_str()?;

    match (table, kind) {
        ("participants", "INSERT") => {
            let row: Participant = serde_json::from_value(data.get("record")?.clone()).ok()?;
            Some(ChangeEvent::ParticipantInserted(row))
        }
        ("participants", "UPDATE") => {
            let row: Participant = serde_json::from_value(data.get("record")?.clone()).ok()?;
            Some(ChangeEvent::ParticipantUpdated(row))
        }
        ("participants", "DELETE") => {
            let id = data.pointer("/old_record/id")?.as_str()?.to_string();
            Some(ChangeEvent::ParticipantDeleted { id })
        }
        ("bids", "INSERT") => {
            let bid: Bid = serde_json::from_value(data.get("record")?.clone()).ok()?;
            Some(ChangeEvent::BidInserted(bid))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Subscriber task
// ---------------------------------------------------------------------------

/// Run the realtime subscriber until the receiving side goes away.
///
/// Owns its own reconnect policy: on transport failure it reports
/// `Disconnected`, backs off (exponential, capped), and re-establishes the
/// channel. Every successful join after the first one emits `Resynced` so the
/// app layer re-fetches a snapshot.
pub async fn run(
    ws_url: String,
    session_id: String,
    tx: mpsc::Sender<RealtimeEvent>,
) -> anyhow::Result<()> {
    let mut backoff = BACKOFF_INITIAL;
    let mut joined_before = false;

    loop {
        if tx
            .send(RealtimeEvent::Status(ConnectionStatus::Connecting))
            .await
            .is_err()
        {
            return Ok(());
        }

        let ws_stream = match connect_async(ws_url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!("realtime connect failed: {e}");
                if tx
                    .send(RealtimeEvent::Status(ConnectionStatus::Disconnected))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(BACKOFF_MAX);
                continue;
            }
        };

        info!("realtime transport connected");
        match run_channel(ws_stream, &session_id, joined_before, &tx).await {
            ChannelExit::ReceiverDropped => return Ok(()),
            ChannelExit::Joined => {
                // The channel was up at some point; reset backoff and mark
                // that the next join is a re-join.
                joined_before = true;
                backoff = BACKOFF_INITIAL;
            }
            ChannelExit::NeverJoined => {}
        }

        if tx
            .send(RealtimeEvent::Status(ConnectionStatus::Disconnected))
            .await
            .is_err()
        {
            return Ok(());
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_MAX);
    }
}

/// Why the per-connection loop ended.
enum ChannelExit {
    /// The app side dropped the receiver; shut down for good.
    ReceiverDropped,
    /// Transport failed after a successful channel join.
    Joined,
    /// Transport failed before the join completed.
    NeverJoined,
}

/// Drive one websocket connection: join the session channel, pump heartbeats,
/// forward decoded changes. Returns when the transport fails or the receiver
/// is dropped.
async fn run_channel<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    session_id: &str,
    is_rejoin: bool,
    tx: &mpsc::Sender<RealtimeEvent>,
) -> ChannelExit
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    if let Err(e) = write
        .send(Message::Text(join_message(session_id).into()))
        .await
    {
        warn!("failed to send channel join: {e}");
        return ChannelExit::NeverJoined;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The first tick fires immediately; the join itself just went out.
    heartbeat.tick().await;

    let mut heartbeat_ref: u64 = 2;
    let mut joined = false;

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match handle_text_frame(&text, is_rejoin, &mut joined, tx).await {
                            Ok(()) => {}
                            Err(FrameError::ReceiverDropped) => return ChannelExit::ReceiverDropped,
                            Err(FrameError::JoinRefused) => {
                                return if joined { ChannelExit::Joined } else { ChannelExit::NeverJoined };
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("realtime server sent close frame");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary, Ping, Pong, Frame: the transport layer
                        // answers pings itself.
                    }
                    Some(Err(e)) => {
                        warn!("realtime transport error: {e}");
                        break;
                    }
                    None => {
                        info!("realtime transport stream ended");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                let msg = heartbeat_message(heartbeat_ref);
                heartbeat_ref += 1;
                if let Err(e) = write.send(Message::Text(msg.into())).await {
                    warn!("heartbeat send failed: {e}");
                    break;
                }
            }
        }
    }

    if joined {
        ChannelExit::Joined
    } else {
        ChannelExit::NeverJoined
    }
}

enum FrameError {
    ReceiverDropped,
    JoinRefused,
}

/// Route one decoded text frame. Emits `Subscribed` (and `Resynced` on a
/// re-join) when the join reply lands, and forwards changes.
async fn handle_text_frame(
    text: &str,
    is_rejoin: bool,
    joined: &mut bool,
    tx: &mpsc::Sender<RealtimeEvent>,
) -> Result<(), FrameError> {
    match parse_server_message(text) {
        Some(ServerMessage::Reply { reference, ok }) if reference == JOIN_REF => {
            if !ok {
                warn!("channel join refused by server");
                return Err(FrameError::JoinRefused);
            }
            *joined = true;
            info!("realtime channel joined");
            if tx
                .send(RealtimeEvent::Status(ConnectionStatus::Subscribed))
                .await
                .is_err()
            {
                return Err(FrameError::ReceiverDropped);
            }
            if is_rejoin && tx.send(RealtimeEvent::Resynced).await.is_err() {
                return Err(FrameError::ReceiverDropped);
            }
        }
        Some(ServerMessage::Reply { .. }) => {
            // Heartbeat ack.
            debug!("heartbeat acknowledged");
        }
        Some(ServerMessage::Change(change)) => {
            if tx.send(RealtimeEvent::Change(change)).await.is_err() {
                return Err(FrameError::ReceiverDropped);
            }
        }
        Some(ServerMessage::Other) => {}
        None => {
            warn!("undecodable realtime frame: {text}");
        }
    }
    Ok(())
}

/// Forward decoded changes from any [`Stream`] of websocket messages through
/// `tx`. This is a pure-logic function that requires no I/O and is the
/// primary unit-test target for the decode path.
///
/// Returns `Err(())` if the channel is closed (receiver dropped), signalling
/// the caller to stop.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<RealtimeEvent>,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if let Some(ServerMessage::Change(change)) = parse_server_message(&text) {
                    if tx.send(RealtimeEvent::Change(change)).await.is_err() {
                        return Err(());
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!("realtime stream error: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio_tungstenite::tungstenite::Error as WsError;

    fn change_frame(table: &str, kind: &str, record: Value) -> String {
        json!({
            "topic": "realtime:session-sess-1",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "schema": "public",
                    "table": table,
                    "type": kind,
                    "record": record,
                },
                "ids": [1]
            },
            "ref": null
        })
        .to_string()
    }

    fn participant_record(id: &str, amount: f64) -> Value {
        json!({
            "id": id,
            "session_id": "sess-1",
            "device_id": format!("dev-{id}"),
            "display_name": "Asha",
            "amount": amount,
            "created_at": "2025-01-05T10:00:00Z"
        })
    }

    // -- URL / framing builders --

    #[test]
    fn websocket_url_from_https() {
        let url = websocket_url("https://proj.supabase.co/", "anon123");
        assert_eq!(
            url,
            "wss://proj.supabase.co/realtime/v1/websocket?apikey=anon123&vsn=1.0.0"
        );
    }

    #[test]
    fn websocket_url_from_http() {
        let url = websocket_url("http://127.0.0.1:54321", "k");
        assert!(url.starts_with("ws://127.0.0.1:54321/realtime"));
    }

    #[test]
    fn join_message_shape() {
        let msg = join_message("sess-1");
        let v: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["topic"], "realtime:session-sess-1");
        assert_eq!(v["event"], "phx_join");
        assert_eq!(v["ref"], JOIN_REF);

        let changes = v.pointer("/payload/config/postgres_changes").unwrap();
        let changes = changes.as_array().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0]["table"], "participants");
        assert_eq!(changes[0]["event"], "*");
        assert_eq!(changes[0]["filter"], "session_id=eq.sess-1");
        assert_eq!(changes[1]["table"], "bids");
        assert_eq!(changes[1]["event"], "INSERT");
    }

    #[test]
    fn heartbeat_message_shape() {
        let v: Value = serde_json::from_str(&heartbeat_message(7)).unwrap();
        assert_eq!(v["topic"], "phoenix");
        assert_eq!(v["event"], "heartbeat");
        assert_eq!(v["ref"], "7");
    }

    // -- Parsing --

    #[test]
    fn parse_join_reply_ok() {
        let text = json!({
            "topic": "realtime:session-sess-1",
            "event": "phx_reply",
            "payload": { "status": "ok", "response": {} },
            "ref": "1"
        })
        .to_string();

        assert_eq!(
            parse_server_message(&text),
            Some(ServerMessage::Reply {
                reference: "1".into(),
                ok: true
            })
        );
    }

    #[test]
    fn parse_join_reply_error() {
        let text = json!({
            "event": "phx_reply",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } },
            "ref": "1"
        })
        .to_string();

        assert_eq!(
            parse_server_message(&text),
            Some(ServerMessage::Reply {
                reference: "1".into(),
                ok: false
            })
        );
    }

    #[test]
    fn parse_participant_insert() {
        let text = change_frame("participants", "INSERT", participant_record("p1", 0.0));
        match parse_server_message(&text) {
            Some(ServerMessage::Change(ChangeEvent::ParticipantInserted(row))) => {
                assert_eq!(row.id, "p1");
                assert_eq!(row.amount, 0.0);
                assert_eq!(row.device_id.as_deref(), Some("dev-p1"));
            }
            other => panic!("expected participant insert, got: {other:?}"),
        }
    }

    #[test]
    fn parse_participant_update() {
        let text = change_frame("participants", "UPDATE", participant_record("p1", 25.0));
        match parse_server_message(&text) {
            Some(ServerMessage::Change(ChangeEvent::ParticipantUpdated(row))) => {
                assert_eq!(row.amount, 25.0);
            }
            other => panic!("expected participant update, got: {other:?}"),
        }
    }

    #[test]
    fn parse_participant_delete_uses_old_record() {
        let text = json!({
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "schema": "public",
                    "table": "participants",
                    "type": "DELETE",
                    "old_record": { "id": "p2" }
                }
            }
        })
        .to_string();

        assert_eq!(
            parse_server_message(&text),
            Some(ServerMessage::Change(ChangeEvent::ParticipantDeleted {
                id: "p2".into()
            }))
        );
    }

    #[test]
    fn parse_bid_insert() {
        let record = json!({
            "id": "b1",
            "session_id": "sess-1",
            "participant_id": "p1",
            "delta": 10,
            "created_at": "2025-01-05T10:01:00Z"
        });
        let text = change_frame("bids", "INSERT", record);
        match parse_server_message(&text) {
            Some(ServerMessage::Change(ChangeEvent::BidInserted(bid))) => {
                assert_eq!(bid.id, "b1");
                assert_eq!(bid.delta, 10.0);
            }
            other => panic!("expected bid insert, got: {other:?}"),
        }
    }

    #[test]
    fn unknown_table_is_other() {
        let text = change_frame("sessions", "UPDATE", json!({ "id": "sess-1" }));
        assert_eq!(parse_server_message(&text), Some(ServerMessage::Other));
    }

    #[test]
    fn bid_update_is_not_a_change() {
        // Bids are append-only; any non-INSERT on that table is unexpected
        // and must not reach the store.
        let text = change_frame("bids", "UPDATE", json!({ "id": "b1" }));
        assert_eq!(parse_server_message(&text), Some(ServerMessage::Other));
    }

    #[test]
    fn system_messages_are_other() {
        let text = json!({
            "event": "system",
            "payload": { "status": "ok", "message": "subscribed to realtime" }
        })
        .to_string();
        assert_eq!(parse_server_message(&text), Some(ServerMessage::Other));
    }

    #[test]
    fn invalid_json_is_none() {
        assert_eq!(parse_server_message("{nope"), None);
        assert_eq!(parse_server_message(""), None);
    }

    #[test]
    fn malformed_record_is_other() {
        // A participants INSERT whose record is missing required fields must
        // be rejected at the boundary, not panic downstream.
        let text = change_frame("participants", "INSERT", json!({ "bogus": true }));
        assert_eq!(parse_server_message(&text), Some(ServerMessage::Other));
    }

    // -- Stream processing --

    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    #[tokio::test]
    async fn changes_forwarded_in_order() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text(
                change_frame("participants", "INSERT", participant_record("p1", 0.0)).into(),
            )),
            Ok(Message::Text(
                change_frame("participants", "UPDATE", participant_record("p1", 10.0)).into(),
            )),
        ];

        process_message_stream(mock_stream(messages), &tx)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            RealtimeEvent::Change(ChangeEvent::ParticipantInserted(row)) => {
                assert_eq!(row.id, "p1")
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            RealtimeEvent::Change(ChangeEvent::ParticipantUpdated(row)) => {
                assert_eq!(row.amount, 10.0)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Close(None)),
            Ok(Message::Text(
                change_frame("participants", "INSERT", participant_record("p1", 0.0)).into(),
            )),
        ];

        process_message_stream(mock_stream(messages), &tx)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn transport_error_stops_processing() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text(
                change_frame("participants", "INSERT", participant_record("p1", 0.0)).into(),
            )),
            Err(WsError::ConnectionClosed),
            Ok(Message::Text(
                change_frame("participants", "INSERT", participant_record("p2", 0.0)).into(),
            )),
        ];

        process_message_stream(mock_stream(messages), &tx)
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            RealtimeEvent::Change(ChangeEvent::ParticipantInserted(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn returns_err_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(64);
        drop(rx);

        let messages = vec![Ok(Message::Text(
            change_frame("participants", "INSERT", participant_record("p1", 0.0)).into(),
        ))];

        let result = process_message_stream(mock_stream(messages), &tx).await;
        assert!(result.is_err());
    }

    // -- Frame routing (join/resync semantics) --

    #[tokio::test]
    async fn join_reply_emits_subscribed() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut joined = false;
        let reply = json!({
            "event": "phx_reply",
            "payload": { "status": "ok" },
            "ref": "1"
        })
        .to_string();

        handle_text_frame(&reply, false, &mut joined, &tx)
            .await
            .map_err(|_| ())
            .unwrap();

        assert!(joined);
        assert_eq!(
            rx.recv().await.unwrap(),
            RealtimeEvent::Status(ConnectionStatus::Subscribed)
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejoin_reply_also_emits_resynced() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut joined = false;
        let reply = json!({
            "event": "phx_reply",
            "payload": { "status": "ok" },
            "ref": "1"
        })
        .to_string();

        handle_text_frame(&reply, true, &mut joined, &tx)
            .await
            .map_err(|_| ())
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            RealtimeEvent::Status(ConnectionStatus::Subscribed)
        );
        assert_eq!(rx.recv().await.unwrap(), RealtimeEvent::Resynced);
    }

    #[tokio::test]
    async fn heartbeat_reply_emits_nothing() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut joined = true;
        let reply = json!({
            "event": "phx_reply",
            "payload": { "status": "ok" },
            "ref": "4"
        })
        .to_string();

        handle_text_frame(&reply, false, &mut joined, &tx)
            .await
            .map_err(|_| ())
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
