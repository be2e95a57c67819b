//! Interactive console client for the voice session relay.
//!
//! Connects to the relay's `/ws` endpoint, streams the microphone upstream,
//! and plays the agent's audio responses through the default output device.
//! Agent transcripts are printed as they arrive. `Ctrl+C` ends the session.

mod capture;
mod playback;
mod protocol;

use anyhow::{Context, Result};
use capture::CapturePipeline;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use playback::{PlaybackQueue, RodioPlayer};
use protocol::{ClientCommand, ServerEvent};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use voicebridge_audio::decode_base64;

#[derive(Parser)]
#[command(name = "voicebridge-console", version, about)]
struct Args {
    /// WebSocket URL of the relay.
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    relay_url: String,

    /// Run without microphone capture (listen-only).
    #[arg(long)]
    no_capture: bool,

    /// Pending agent clips held before the newest are dropped.
    #[arg(long, default_value_t = 32)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    info!(url = %args.relay_url, "Connecting to relay");
    let (ws, _) = connect_async(&args.relay_url)
        .await
        .context("Failed to connect to relay")?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    // All outgoing traffic funnels through one writer task so the capture
    // pipeline and the main loop never contend for the sink.
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    out_tx
        .send(ClientCommand::ActivateAgent.to_json())
        .await
        .context("Relay writer unavailable")?;

    let capture = if args.no_capture {
        None
    } else {
        Some(CapturePipeline::start(out_tx.clone())?)
    };
    let queue = PlaybackQueue::spawn(RodioPlayer::new, args.queue_capacity);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; closing session");
                break;
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_event(text.as_str(), &queue),
                Some(Ok(Message::Close(_))) | None => {
                    info!("Relay closed the session");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Transport error");
                    break;
                }
            },
        }
    }

    if let Some(capture) = capture {
        capture.stop().await;
    }
    drop(out_tx);
    let _ = writer.await;
    queue.close();
    Ok(())
}

fn handle_event(text: &str, queue: &PlaybackQueue) {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Ignoring unrecognized relay message");
            return;
        }
    };
    match event {
        ServerEvent::Welcome { message } => println!("* {message}"),
        ServerEvent::AgentSpeech { message } => println!("agent: {message}"),
        ServerEvent::AudioChunk { data, is_final } => {
            if is_final {
                debug!("End of agent audio turn");
                return;
            }
            match decode_base64(&data) {
                Ok(clip) => queue.enqueue(clip),
                Err(e) => warn!(error = %e, "Dropping undecodable audio chunk"),
            }
        }
        ServerEvent::Error { message } => eprintln!("relay error: {message}"),
    }
}
