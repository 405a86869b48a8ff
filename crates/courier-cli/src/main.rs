//! # courier
//!
//! Terminal consumer for the Courier message core. `chat` talks to one agent
//! from stdin; `watch` prints every envelope the engine delivers.

#![deny(unsafe_code)]

mod demo;
mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use courier_client::{ChatState, MessageSubscription, bind_chat_state};
use courier_core::{Action, AgentId, ConnectionStatus, Envelope, MessageType, Route};
use courier_dispatch::{HandlerError, handler};
use courier_engine::{Engine, EngineContext, LifecyclePolicy, MessageEngine, WsConnector, loopback};
use courier_settings::CourierSettings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// How long `chat` waits for the first connection before giving up.
const CONNECT_WAIT: Duration = Duration::from_secs(30);

/// Courier terminal client.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Courier terminal client", version)]
struct Cli {
    /// WebSocket endpoint (overrides settings).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Settings file (default `~/.courier/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Talk to an in-process echo peer instead of a server.
    #[arg(long, global = true)]
    loopback: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat with an agent from stdin. Lines starting with `/` are sent as commands.
    Chat {
        /// Agent to address (overrides `client.defaultAgent`).
        #[arg(long)]
        agent: Option<String>,
    },
    /// Print every envelope until interrupted.
    Watch,
}

fn load_settings(cli: &Cli) -> Result<CourierSettings> {
    let mut settings = match &cli.settings {
        Some(path) => courier_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => courier_settings::load_settings().context("Failed to load settings")?,
    };
    if let Some(url) = &cli.url {
        settings.engine.url.clone_from(url);
        settings.validate().context("Invalid --url")?;
    }
    Ok(settings)
}

fn build_context(settings: &CourierSettings, use_loopback: bool) -> EngineContext {
    let source = settings.client.source.clone();
    let policy = LifecyclePolicy {
        auto_connect: settings.engine.auto_connect,
        keep_alive: settings.engine.keep_alive(),
    };

    if use_loopback {
        let (connector, server) = loopback();
        let _peer = demo::spawn_echo(server);
        info!("using in-process echo peer");
        return EngineContext::builder(move || {
            let engine: Arc<dyn MessageEngine> =
                Arc::new(Engine::with_source(Arc::new(connector.clone()), source.clone()));
            Ok(engine)
        })
        .policy(policy)
        .build();
    }

    let engine = settings.engine.clone();
    EngineContext::builder(move || {
        let connector = WsConnector::new(engine.url.clone())
            .with_connect_timeout(engine.connect_timeout())
            .with_queue_capacity(engine.send_queue_capacity);
        let engine: Arc<dyn MessageEngine> =
            Arc::new(Engine::with_source(Arc::new(connector), source.clone()));
        Ok(engine)
    })
    .policy(policy)
    .build()
}

/// Printers for `command`, installed before the first connect so its
/// transitions and `connection:open` are shown. They live until unmount.
fn install_printers(subscription: &MessageSubscription, command: &Command) {
    let _ = subscription.on_status(Arc::new(|status: &ConnectionStatus| {
        eprintln!("{}", render::status_line(status));
    }));

    let _ = match command {
        Command::Chat { .. } => subscription.register_for_route(
            Route::Chat,
            |envelope: &Envelope| -> Result<(), HandlerError> {
                if envelope.action() != Action::MessageSend {
                    println!("{}", render::envelope_line(envelope));
                }
                Ok(())
            },
            0,
        ),
        Command::Watch => subscription.register(
            handler::any(),
            |envelope: &Envelope| -> Result<(), HandlerError> {
                println!("{}", render::envelope_line(envelope));
                Ok(())
            },
        ),
    };
}

/// Connect when the lifecycle policy did not do it on mount.
fn connect_if_idle(subscription: &MessageSubscription, auto_connect: bool) {
    let status = subscription.status();
    if !auto_connect && !status.is_connected && !status.is_connecting {
        subscription.engine().connect();
    }
}

async fn wait_connected(subscription: &MessageSubscription, auto_connect: bool) -> Result<()> {
    connect_if_idle(subscription, auto_connect);
    let mut status = subscription.engine().watch_status();
    let reached = tokio::time::timeout(
        CONNECT_WAIT,
        status.wait_for(|s| s.is_connected || s.error.is_some()),
    )
    .await
    .context("Timed out waiting for connection")?
    .context("Engine stopped")?
    .clone();
    if let Some(err) = reached.error {
        bail!("Connection failed: {err}");
    }
    Ok(())
}

async fn run_chat(
    subscription: &MessageSubscription,
    agent: Option<AgentId>,
    auto_connect: bool,
) -> Result<()> {
    let state = Arc::new(ChatState::new());
    let binding = bind_chat_state(subscription, state.clone());
    wait_connected(subscription, auto_connect).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if !state.can_send() {
            eprintln!("-- not connected, message not sent");
            continue;
        }
        let message_type = if line.starts_with('/') {
            MessageType::Command
        } else {
            MessageType::Text
        };
        subscription.send_message(line, message_type, agent.as_ref());
    }

    info!(
        messages = state.messages(agent.as_ref()).len(),
        "chat session ended"
    );
    binding.dispose();
    Ok(())
}

async fn run_watch(subscription: &MessageSubscription, auto_connect: bool) -> Result<()> {
    connect_if_idle(subscription, auto_connect);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    if settings.logging.json {
        courier_logging::init_json_subscriber(&settings.logging.level);
    } else {
        courier_logging::init_subscriber(&settings.logging.level);
    }

    let context = build_context(&settings, cli.loopback);
    let subscription =
        MessageSubscription::mount_with(&context, |sub| install_printers(sub, &cli.command))
            .context("Failed to start engine")?;
    info!(url = %settings.engine.url, loopback = cli.loopback, "courier started");

    let auto_connect = settings.engine.auto_connect;
    let result = match cli.command {
        Command::Chat { agent } => {
            let agent = agent
                .or_else(|| settings.client.default_agent.clone())
                .map(AgentId::from_raw);
            run_chat(&subscription, agent, auto_connect).await
        }
        Command::Watch => run_watch(&subscription, auto_connect).await,
    };

    subscription.unmount();
    result
}
