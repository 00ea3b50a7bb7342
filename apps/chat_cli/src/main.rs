use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use client_core::{
    load_settings, pump_push_frames, EventHub, HttpChatApi, OutgoingMessage, SessionEvent,
    SessionManager,
};
use futures::StreamExt;
use shared::protocol::{Message, Peer};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides the configured API base, e.g. http://127.0.0.1:5001/api
    #[arg(long)]
    server_url: Option<String>,
    /// Peer to open, by id or full name.
    #[arg(long)]
    peer: Option<String>,
    #[arg(long)]
    send: Option<String>,
    #[arg(long)]
    image: Option<String>,
    /// Keep the conversation open and print live messages until Ctrl-C.
    #[arg(long)]
    follow: bool,
    /// Websocket endpoint carrying push frames. Derived from the server URL when omitted.
    #[arg(long)]
    push_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url.clone() {
        settings.server_url = server_url;
    }
    let api = Arc::new(HttpChatApi::new(&settings)?);
    let hub = EventHub::new();
    let session = SessionManager::new(api, hub.clone(), &settings);

    let peers = session.load_peers().await?;
    for peer in &peers {
        println!("{}  {}", peer.id, peer.full_name);
    }

    let Some(wanted) = args.peer.as_deref() else {
        return Ok(());
    };
    let peer = find_peer(&peers, wanted).ok_or_else(|| anyhow!("no peer matches '{wanted}'"))?;
    if let Some(load) = session.select_conversation(peer) {
        load.await?;
    }
    for message in session.snapshot().messages {
        print_message(&message);
    }

    if args.send.is_some() || args.image.is_some() {
        let draft = OutgoingMessage {
            text: args.send.clone(),
            image: args.image.clone(),
        };
        let sent = session.send_message(&draft).await?;
        print_message(&sent);
    }

    if !args.follow {
        return Ok(());
    }

    let push_url = match args.push_url {
        Some(push_url) => push_url,
        None => push_url_for(&settings.server_url)?,
    };
    let (ws_stream, _) = connect_async(&push_url)
        .await
        .with_context(|| format!("failed to connect websocket: {push_url}"))?;
    info!("chat_cli: following live messages via {push_url}");
    let (_, reader) = ws_stream.split();
    let pump_hub = Arc::clone(&hub);
    let mut pump = tokio::spawn(async move { pump_push_frames(reader, &pump_hub).await });

    let mut events = session.subscribe_events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            finished = &mut pump => {
                match finished {
                    Ok(delivered) => info!("chat_cli: push connection ended after {delivered} deliveries"),
                    Err(err) => warn!("chat_cli: push reader failed: {err}"),
                }
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::MessageAppended(message)) => print_message(&message),
                Ok(SessionEvent::Error { message, .. }) => eprintln!("error: {message}"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("chat_cli: skipped {skipped} session events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.unsubscribe_from_messages();
    pump.abort();
    Ok(())
}

fn find_peer(peers: &[Peer], wanted: &str) -> Option<Peer> {
    peers
        .iter()
        .find(|peer| peer.id.as_str() == wanted || peer.full_name.eq_ignore_ascii_case(wanted))
        .cloned()
}

fn push_url_for(server_url: &str) -> Result<String> {
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(anyhow!("server_url must start with http:// or https://"));
    };
    Ok(format!("{}/ws", ws_url.trim_end_matches('/')))
}

fn print_message(message: &Message) {
    let image = message
        .image
        .as_deref()
        .map(|url| format!(" [image {url}]"))
        .unwrap_or_default();
    println!(
        "[{}] {} -> {}: {}{image}",
        message.created_at.format("%H:%M"),
        message.sender_id,
        message.receiver_id,
        message.text.as_deref().unwrap_or_default(),
    );
}
