//! Several consumers sharing one engine over a loopback transport.

use std::sync::Arc;
use std::time::Duration;

use courier_client::{ChatState, MessageSubscription, bind_chat_state};
use courier_core::{
    AgentId, ChatMessage, ConnectionState, ConnectionStatus, Envelope, MessageType, Route,
};
use courier_dispatch::HandlerError;
use courier_engine::{
    Engine, EngineContext, LifecycleEvent, LifecyclePolicy, LoopbackServer, MessageEngine, loopback,
};
use parking_lot::Mutex;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(2);

fn context(policy: LifecyclePolicy) -> (EngineContext, LoopbackServer) {
    let (connector, server) = loopback();
    let context = EngineContext::builder(move || {
        let engine: Arc<dyn MessageEngine> = Arc::new(Engine::new(Arc::new(connector.clone())));
        Ok(engine)
    })
    .policy(policy)
    .build();
    (context, server)
}

async fn wait_state(sub: &MessageSubscription, state: ConnectionState) {
    let mut rx = sub.engine().watch_status();
    let _ = timeout(TIMEOUT, rx.wait_for(|s| s.state() == state))
        .await
        .expect("state not reached")
        .expect("engine gone");
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met");
}

#[tokio::test]
async fn two_consumers_share_one_connection() {
    let (context, server) = context(LifecyclePolicy::default());
    let dashboard = MessageSubscription::mount(&context).unwrap();
    let sidebar = MessageSubscription::mount(&context).unwrap();
    assert!(Arc::ptr_eq(dashboard.engine(), sidebar.engine()));

    let dashboard_state = Arc::new(ChatState::new());
    let sidebar_state = Arc::new(ChatState::new());
    let _a = bind_chat_state(&dashboard, dashboard_state.clone());
    let _b = bind_chat_state(&sidebar, sidebar_state.clone());

    wait_state(&dashboard, ConnectionState::Connected).await;
    assert_eq!(server.connect_count(), 1);
    wait_until(|| dashboard_state.can_send() && sidebar_state.can_send()).await;

    let agent = AgentId::from_raw("agent_support");
    let reply = Envelope::chat_received(ChatMessage::text("how can I help?"))
        .with_agent(agent.clone())
        .with_order(1);
    assert!(server.push_envelope(&reply));
    assert!(server.push_envelope(&reply));

    wait_until(|| dashboard_state.message_count() == 1 && sidebar_state.message_count() == 1).await;
    assert_eq!(
        dashboard_state.last_message(Some(&agent)).unwrap().message.content,
        "how can I help?"
    );
}

#[tokio::test]
async fn failing_consumer_does_not_starve_the_other() {
    let (context, server) = context(LifecyclePolicy::default());
    let noisy = MessageSubscription::mount(&context).unwrap();
    let quiet = MessageSubscription::mount(&context).unwrap();

    let _boom = noisy.register_for_route(
        Route::Chat,
        |_: &Envelope| -> Result<(), HandlerError> { panic!("render crashed") },
        100,
    );
    let state = Arc::new(ChatState::new());
    let _bound = bind_chat_state(&quiet, state.clone());
    let noisy_state = Arc::new(ChatState::new());
    let _noisy_bound = bind_chat_state(&noisy, noisy_state.clone());

    wait_state(&quiet, ConnectionState::Connected).await;
    for n in 1..=3 {
        let env = Envelope::chat_received(ChatMessage::text(format!("m{n}"))).with_order(n);
        assert!(server.push_envelope(&env));
    }

    wait_until(|| state.message_count() == 3 && noisy_state.message_count() == 3).await;
    assert!(noisy.is_connected());
}

#[tokio::test]
async fn last_unmount_disconnects_and_remount_reconnects() {
    let (context, server) = context(LifecyclePolicy::default());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _watch = context.on_lifecycle(Arc::new(move |e: &LifecycleEvent| sink.lock().push(*e)));

    let first = MessageSubscription::mount(&context).unwrap();
    wait_state(&first, ConnectionState::Connected).await;
    let mut status = first.engine().watch_status();
    drop(first);

    let _ = timeout(TIMEOUT, status.wait_for(|s| s.state() == ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        *events.lock(),
        vec![
            LifecycleEvent::Acquired { count: 1 },
            LifecycleEvent::Released { count: 0 },
            LifecycleEvent::Disconnected,
        ]
    );

    let second = MessageSubscription::mount(&context).unwrap();
    wait_state(&second, ConnectionState::Connected).await;
    assert_eq!(server.connect_count(), 2);

    second.send_message("back again", MessageType::Markdown, None);
    let frame = timeout(TIMEOUT, server.next_sent()).await.unwrap().unwrap();
    assert!(frame.contains("back again"));
}

#[tokio::test]
async fn immediate_remount_after_last_unmount_reconnects() {
    let (context, server) = context(LifecyclePolicy::default());
    let first = MessageSubscription::mount(&context).unwrap();
    wait_state(&first, ConnectionState::Connected).await;
    drop(first);

    // No await in between: the engine has not yet handled the disconnect.
    let states = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&states);
    let second = MessageSubscription::mount_with(&context, |sub| {
        let _ = sub.on_status(Arc::new(move |s: &ConnectionStatus| seen.lock().push(s.state())));
    })
    .unwrap();

    wait_until(|| server.connect_count() == 2).await;
    wait_state(&second, ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(second.is_connected());
    assert_eq!(states.lock().last(), Some(&ConnectionState::Connected));

    second.send_message("still here", MessageType::Text, None);
    let frame = timeout(TIMEOUT, server.next_sent()).await.unwrap().unwrap();
    assert!(frame.contains("still here"));
}

#[tokio::test(start_paused = true)]
async fn keep_alive_covers_a_quick_remount() {
    let (context, server) = context(LifecyclePolicy {
        auto_connect: true,
        keep_alive: Some(Duration::from_secs(5)),
    });

    let first = MessageSubscription::mount(&context).unwrap();
    wait_state(&first, ConnectionState::Connected).await;
    first.unmount();

    tokio::time::advance(Duration::from_secs(1)).await;
    let second = MessageSubscription::mount(&context).unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::task::yield_now().await;

    assert!(second.is_connected());
    assert_eq!(server.connect_count(), 1);
}
