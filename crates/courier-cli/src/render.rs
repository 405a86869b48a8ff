//! One-line terminal rendering of envelopes and status.

use courier_core::{ConnectionStatus, Envelope, Payload};

/// Render an envelope as a single line.
pub fn envelope_line(envelope: &Envelope) -> String {
    let mut prefix = format!("[{} {}]", envelope.route(), envelope.action());
    if let Some(agent) = envelope.agent_id() {
        prefix.push(' ');
        prefix.push_str(agent.as_str());
    }
    if let Some(order) = envelope.order() {
        prefix.push_str(&format!(" #{order}"));
    }

    let body = match envelope.data() {
        Payload::Chat(m) => m.content.clone(),
        Payload::System(m) => m.content.clone(),
        Payload::Notification(n) => match &n.title {
            Some(title) => format!("{title}: {}", n.body),
            None => n.body.clone(),
        },
        Payload::Command(c) => format!("/{} {}", c.name, c.args),
        Payload::Connection(c) => c.reason.clone().unwrap_or_default(),
        Payload::Error(e) => match &e.code {
            Some(code) => format!("{code}: {}", e.message),
            None => e.message.clone(),
        },
        Payload::Status(s) => s.status.clone(),
    };

    if body.is_empty() {
        prefix
    } else {
        format!("{prefix} {body}")
    }
}

/// Render a status snapshot.
pub fn status_line(status: &ConnectionStatus) -> String {
    match &status.error {
        Some(err) => format!("-- {} ({err})", status.state()),
        None => format!("-- {}", status.state()),
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{AgentId, ChatMessage, Route};
    use serde_json::json;

    use super::*;

    #[test]
    fn chat_line_has_agent_and_order() {
        let env = Envelope::chat_received(ChatMessage::text("hello"))
            .with_agent(AgentId::from_raw("agent_1"))
            .with_order(12);
        assert_eq!(envelope_line(&env), "[chat message:received] agent_1 #12 hello");
    }

    #[test]
    fn error_line_has_code() {
        let env = Envelope::error(Route::Chat, Some("not_connected"), "not connected");
        assert_eq!(
            envelope_line(&env),
            "[chat error:occurred] not_connected: not connected"
        );
    }

    #[test]
    fn close_without_reason_is_bare() {
        let env = Envelope::connection_close(None);
        assert_eq!(envelope_line(&env), "[system connection:close]");
    }

    #[test]
    fn notification_with_title() {
        let payload = Payload::decode(
            Route::Notification,
            courier_core::Action::MessageReceived,
            json!({"title": "Deploy", "body": "done"}),
        )
        .unwrap();
        let env = Envelope::try_new(Route::Notification, courier_core::Action::MessageReceived, payload)
            .unwrap();
        assert_eq!(envelope_line(&env), "[notification message:received] Deploy: done");
    }

    #[test]
    fn status_lines() {
        assert_eq!(status_line(&ConnectionStatus::default()), "-- disconnected");
        assert_eq!(
            status_line(&ConnectionStatus::failed("refused", None)),
            "-- error (refused)"
        );
    }
}
