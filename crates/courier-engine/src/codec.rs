//! JSON wire codec.
//!
//! Frames look like:
//!
//! ```json
//! { "route": "chat", "action": "message:received", "data": { "content": "hi" },
//!   "timestamp": "2026-01-01T00:00:00Z", "source": "server", "order": 4, "agentId": "a1" }
//! ```
//!
//! Only `route` and `action` are required. Decoding always assigns a fresh
//! envelope id; an `id` on the wire is ignored.

use chrono::{DateTime, Utc};
use courier_core::{Action, AgentId, DecodeError, Envelope, Payload, Route, SERVER_SOURCE, SessionId};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFrame {
    route: Option<String>,
    action: Option<String>,
    #[serde(default)]
    data: Value,
    timestamp: Option<DateTime<Utc>>,
    source: Option<String>,
    session_id: Option<String>,
    order: Option<u64>,
    agent_id: Option<String>,
}

/// Decode one text frame received at `received_at`.
pub fn decode(text: &str, received_at: DateTime<Utc>) -> Result<Envelope, DecodeError> {
    let frame: WireFrame = serde_json::from_str(text)?;

    let route: Route = frame.route.ok_or(DecodeError::MissingField("route"))?.parse()?;
    let action: Action = frame.action.ok_or(DecodeError::MissingField("action"))?.parse()?;
    let payload = Payload::decode(route, action, frame.data)?;

    // The pair was used to pick the variant, so this cannot mismatch.
    let mut envelope = match payload {
        Payload::Chat(message) if action == Action::MessageSend => Envelope::chat_send(message),
        Payload::Chat(message) if action == Action::MessageReceived => {
            Envelope::chat_received(message)
        }
        other => Envelope::try_new(route, action, other).map_err(|err| {
            DecodeError::Malformed(serde::de::Error::custom(err.to_string()))
        })?,
    };

    envelope = envelope
        .with_timestamp(frame.timestamp.unwrap_or(received_at))
        .with_source(frame.source.unwrap_or_else(|| SERVER_SOURCE.to_owned()));
    if let Some(session) = frame.session_id {
        envelope = envelope.with_session(SessionId::from_raw(session));
    }
    if let Some(order) = frame.order {
        envelope = envelope.with_order(order);
    }
    if let Some(agent) = frame.agent_id {
        envelope = envelope.with_agent(AgentId::from_raw(agent));
    }
    Ok(envelope)
}

/// Encode an envelope as one text frame.
pub fn encode(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use courier_core::{MessageType, PayloadKind};
    use serde_json::json;

    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn decodes_full_chat_frame() {
        let text = json!({
            "id": "server-side-id",
            "route": "chat",
            "action": "message:received",
            "data": { "content": "hello", "type": "markdown", "role": "assistant" },
            "timestamp": "2026-02-01T08:30:00Z",
            "source": "gateway",
            "sessionId": "sess_1",
            "order": 7,
            "agentId": "agent_9",
        })
        .to_string();

        let env = decode(&text, now()).unwrap();
        assert!(env.is(Route::Chat, Action::MessageReceived));
        assert_ne!(env.id().as_str(), "server-side-id");
        assert_eq!(env.source(), "gateway");
        assert_eq!(env.timestamp(), "2026-02-01T08:30:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(env.session_id().map(SessionId::as_str), Some("sess_1"));
        assert_eq!(env.order(), Some(7));
        assert_eq!(env.agent_id().map(AgentId::as_str), Some("agent_9"));

        let msg = env.chat_message().unwrap();
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.message_type, MessageType::Markdown);
    }

    #[test]
    fn defaults_timestamp_and_source() {
        let env = decode(r#"{"route":"system","action":"message:received","data":"up"}"#, now())
            .unwrap();
        assert_eq!(env.timestamp(), now());
        assert_eq!(env.source(), SERVER_SOURCE);
        assert_eq!(env.data().kind(), PayloadKind::System);
    }

    #[test]
    fn agent_in_payload_is_lifted() {
        let env = decode(
            r#"{"route":"chat","action":"message:received","data":{"content":"x","agentId":"a1"}}"#,
            now(),
        )
        .unwrap();
        assert_eq!(env.agent_id().map(AgentId::as_str), Some("a1"));
    }

    #[test]
    fn fresh_id_per_decode() {
        let text = r#"{"route":"system","action":"connection:open"}"#;
        let a = decode(text, now()).unwrap();
        let b = decode(text, now()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.data().kind(), PayloadKind::Connection);
    }

    #[test]
    fn rejects_bad_frames() {
        assert_matches!(decode("not json", now()), Err(DecodeError::Malformed(_)));
        assert_matches!(decode("[1,2]", now()), Err(DecodeError::Malformed(_)));
        assert_matches!(
            decode(r#"{"action":"message:send"}"#, now()),
            Err(DecodeError::MissingField("route"))
        );
        assert_matches!(
            decode(r#"{"route":"chat"}"#, now()),
            Err(DecodeError::MissingField("action"))
        );
        assert_matches!(
            decode(r#"{"route":"email","action":"message:send"}"#, now()),
            Err(DecodeError::UnknownRoute(r)) if r == "email"
        );
        assert_matches!(
            decode(r#"{"route":"chat","action":"message:edit"}"#, now()),
            Err(DecodeError::UnknownAction(_))
        );
        assert_matches!(
            decode(r#"{"route":"chat","action":"message:send","data":{"body":1}}"#, now()),
            Err(DecodeError::Payload { expected: PayloadKind::Chat, .. })
        );
    }

    #[test]
    fn encode_produces_wire_shape() {
        let env = Envelope::chat_send(courier_core::ChatMessage::text("hi"))
            .with_agent(AgentId::from_raw("agent_1"))
            .with_order(3);
        let value: Value = serde_json::from_str(&encode(&env).unwrap()).unwrap();
        assert_eq!(value["route"], "chat");
        assert_eq!(value["action"], "message:send");
        assert_eq!(value["data"]["content"], "hi");
        assert_eq!(value["data"]["type"], "text");
        assert_eq!(value["agentId"], "agent_1");
        assert_eq!(value["order"], 3);
        assert!(value.get("sessionId").is_none());
    }

    #[test]
    fn encoded_frames_decode_back() {
        let sent = Envelope::error(Route::Chat, Some("not_connected"), "offline");
        let back = decode(&encode(&sent).unwrap(), now()).unwrap();
        assert!(back.is(Route::Chat, Action::ErrorOccurred));
        assert_eq!(back.data(), sent.data());
        assert_eq!(back.timestamp(), sent.timestamp());
    }
}
