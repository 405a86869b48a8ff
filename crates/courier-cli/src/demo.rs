//! In-process echo peer for `--loopback`.

use chrono::Utc;
use courier_core::{ChatMessage, ChatRole, Envelope, Route, StatusNotice};
use courier_engine::{LoopbackServer, codec};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Reply to every chat send with an assistant echo, preceded by a `typing`
/// status. Runs until the client side goes away.
pub fn spawn_echo(server: LoopbackServer) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut order = 0_u64;
        while let Some(frame) = server.next_sent().await {
            let sent = match codec::decode(&frame, Utc::now()) {
                Ok(sent) => sent,
                Err(err) => {
                    warn!(error = %err, "demo peer received an undecodable frame");
                    continue;
                }
            };
            let Some(reply) = echo_reply(&sent, order + 1) else {
                debug!(route = %sent.route(), action = %sent.action(), "demo peer ignored frame");
                continue;
            };
            order += 1;

            let mut typing = Envelope::status(
                Route::Chat,
                StatusNotice {
                    status: "typing".into(),
                    detail: None,
                },
            );
            if let Some(agent) = sent.agent_id() {
                typing = typing.with_agent(agent.clone());
            }
            let _ = server.push_envelope(&typing);
            let _ = server.push_envelope(&reply);
        }
        debug!("demo peer stopped");
    })
}

/// The echo for one client send, or `None` if `sent` is not a chat send.
pub fn echo_reply(sent: &Envelope, order: u64) -> Option<Envelope> {
    if !sent.is(Route::Chat, courier_core::Action::MessageSend) {
        return None;
    }
    let original = sent.chat_message()?;
    let mut message = ChatMessage::text(format!("echo: {}", original.content));
    message.message_type = original.message_type;
    message.role = Some(ChatRole::Assistant);

    let mut reply = Envelope::chat_received(message).with_order(order);
    if let Some(agent) = sent.agent_id() {
        reply = reply.with_agent(agent.clone());
    }
    Some(reply)
}
