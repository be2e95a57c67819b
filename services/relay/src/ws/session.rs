//! Manages the WebSocket session lifecycle: one downstream (browser)
//! connection paired with one upstream (vendor) connection.
//!
//! A session moves through `Idle -> Connecting -> Open -> Closed`. The
//! phases map onto control flow in [`run_session`]: `Connecting` is the
//! upstream dial plus negotiation, `Open` is the coordinator loop, and
//! leaving the loop for any reason is `Closed`. Because a single task owns
//! both socket halves and relays them through one `select!` loop, the
//! "close one, close both" invariant is structural: there is no path out of
//! the loop that leaves either end running.

use super::{
    protocol::{ClientMessage, ServerMessage},
    vendor::{self, ResponseAudioFormat, UserAudioFrame, VendorCommand, VendorEvent, VendorStream},
};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{Instrument, debug, error, info, warn};
use voicebridge_audio::{
    AudioFormat, CodecError, FormatDescriptor, decode_base64, detect_format, encode_base64,
    pcm16_to_wav,
};

type BrowserSink = SplitSink<WebSocket, Message>;
type VendorSink = SplitSink<VendorStream, WsMessage>;

/// Axum handler to upgrade an HTTP connection to a WebSocket session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, peer: SocketAddr) {
    // Session identifier derived from the peer address; the suffix keeps
    // reconnects from the same port distinguishable in logs.
    let session_id = format!("{}#{:04x}", peer, rand::random::<u16>());
    let span = tracing::info_span!("session", %session_id);
    async move {
        if let Err(e) = run_session(socket, state).await {
            error!(error = ?e, "Session terminated with error");
        }
    }
    .instrument(span)
    .await
}

/// Audio bookkeeping for one session. The format descriptor is learned once
/// from the vendor's initiation metadata; the wire encoding is pinned on the
/// first chunk and never silently reclassified afterwards.
#[derive(Default)]
struct TurnAudio {
    descriptor: FormatDescriptor,
    pinned: Option<AudioFormat>,
    /// Set while a cancelled turn's residual audio is being discarded.
    suppress: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

async fn run_session(socket: WebSocket, state: Arc<AppState>) -> Result<()> {
    info!("Accepted downstream connection; dialing vendor");
    let (mut browser_tx, mut browser_rx) = socket.split();

    // Connecting: pair this downstream connection with exactly one
    // upstream connection. A failed dial is surfaced to the browser and
    // the session never opens.
    let vendor_stream = match vendor::connect(&state.config).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = send_to_browser(
                &mut browser_tx,
                &ServerMessage::Error {
                    message: format!("Vendor connection failed: {e}"),
                },
            )
            .await;
            let _ = browser_tx.send(Message::Close(None)).await;
            return Err(e);
        }
    };
    let (mut vendor_tx, mut vendor_rx) = vendor_stream.split();

    // Negotiate the response encoding, then kick off the conversation.
    send_to_vendor(
        &mut vendor_tx,
        &VendorCommand::SetResponseAudioFormat {
            response_audio_format: ResponseAudioFormat::mp3_default(),
        },
    )
    .await?;
    send_to_vendor(&mut vendor_tx, &VendorCommand::ConversationInitiationClientData).await?;

    let _guard = state.track_session();
    info!("Session open");

    let result = relay_loop(
        &mut browser_tx,
        &mut browser_rx,
        &mut vendor_tx,
        &mut vendor_rx,
    )
    .await;

    // Closed: whichever side ended the loop, close the other one too.
    let _ = vendor_tx.send(WsMessage::Close(None)).await;
    let _ = browser_tx.send(Message::Close(None)).await;
    info!("Session closed");
    result
}

/// The steady-state coordinator: translates and forwards events in both
/// directions, in arrival order per direction, until either leg closes or
/// errors.
async fn relay_loop(
    browser_tx: &mut BrowserSink,
    browser_rx: &mut SplitStream<WebSocket>,
    vendor_tx: &mut VendorSink,
    vendor_rx: &mut SplitStream<VendorStream>,
) -> Result<()> {
    let mut turn = TurnAudio::default();

    loop {
        tokio::select! {
            msg = browser_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if handle_browser_message(text.as_str(), vendor_tx).await? == Flow::Shutdown {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Downstream closed");
                    break;
                }
                Some(Ok(_)) => {} // binary/ping/pong: nothing to translate
                Some(Err(e)) => {
                    warn!(error = %e, "Downstream transport error");
                    break;
                }
            },
            msg = vendor_rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    if handle_vendor_event(text.as_str(), &mut turn, browser_tx, vendor_tx).await?
                        == Flow::Shutdown
                    {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("Upstream closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Upstream transport error");
                    break;
                }
            },
        }
    }
    Ok(())
}

/// Translates one browser message. Malformed JSON drops that single message
/// and the session continues.
async fn handle_browser_message(text: &str, vendor_tx: &mut VendorSink) -> Result<Flow> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Dropping malformed client frame");
            return Ok(Flow::Continue);
        }
    };

    match msg {
        ClientMessage::ActivateAgent => {
            // The initiation event already went out when the session
            // opened, so activation needs no upstream counterpart.
            debug!("Agent activation acknowledged");
        }
        ClientMessage::Interrupt => {
            send_to_vendor(vendor_tx, &VendorCommand::Interrupt).await?;
        }
        ClientMessage::UserAudioChunk { data } => {
            send_to_vendor(vendor_tx, &UserAudioFrame { user_audio_chunk: data }).await?;
        }
    }
    Ok(Flow::Continue)
}

/// Translates one vendor event. Malformed JSON drops that single message
/// and the session continues; a vendor error event ends the session after
/// being surfaced downstream.
async fn handle_vendor_event(
    text: &str,
    turn: &mut TurnAudio,
    browser_tx: &mut BrowserSink,
    vendor_tx: &mut VendorSink,
) -> Result<Flow> {
    let event = match serde_json::from_str::<VendorEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Dropping malformed vendor frame");
            return Ok(Flow::Continue);
        }
    };

    match event {
        VendorEvent::ConversationInitiationMetadata {
            conversation_initiation_metadata_event: meta,
        } => {
            if let Some(desc) = meta
                .agent_output_audio_format
                .as_deref()
                .and_then(FormatDescriptor::from_vendor_label)
            {
                turn.descriptor = desc;
            }
            info!(
                sample_rate = turn.descriptor.sample_rate,
                channels = turn.descriptor.channels,
                "Vendor session initialized"
            );
            send_to_browser(
                browser_tx,
                &ServerMessage::Welcome {
                    message: "Agent ready".to_string(),
                },
            )
            .await?;
        }
        VendorEvent::Ping { ping_event } => {
            // Liveness contract with the vendor; answered directly, never
            // forwarded downstream.
            send_to_vendor(vendor_tx, &VendorCommand::Pong {
                event_id: ping_event.event_id,
            })
            .await?;
        }
        VendorEvent::Audio { audio_event } => {
            if turn.suppress {
                debug!("Dropping audio chunk from cancelled turn");
                return Ok(Flow::Continue);
            }
            match prepare_audio_chunk(&audio_event.audio_base_64, turn) {
                Ok(data) => {
                    send_to_browser(browser_tx, &ServerMessage::AudioChunk {
                        data,
                        is_final: false,
                    })
                    .await?;
                }
                Err(e) => warn!(error = %e, "Dropping undecodable audio chunk"),
            }
        }
        VendorEvent::AgentResponse {
            agent_response_event,
        } => {
            // Turn boundary: emit the end-of-audio marker, lift any cancel.
            turn.suppress = false;
            send_to_browser(browser_tx, &ServerMessage::AudioChunk {
                data: String::new(),
                is_final: true,
            })
            .await?;
            send_to_browser(browser_tx, &ServerMessage::AgentSpeech {
                message: agent_response_event.agent_response,
            })
            .await?;
        }
        VendorEvent::UserTranscript {
            user_transcription_event,
        } => {
            info!(transcript = %user_transcription_event.user_transcript, "User transcript");
        }
        VendorEvent::Interruption { interruption_event } => {
            turn.suppress = true;
            info!(
                reason = ?interruption_event.and_then(|e| e.reason),
                "Vendor acknowledged interrupt; suppressing audio until next turn"
            );
        }
        VendorEvent::Error { message } => {
            let message = message.unwrap_or_else(|| "vendor error".to_string());
            warn!(%message, "Vendor reported error; closing session");
            send_to_browser(browser_tx, &ServerMessage::Error { message }).await?;
            return Ok(Flow::Shutdown);
        }
        VendorEvent::Unknown => {
            debug!("Ignoring unhandled vendor event");
        }
    }
    Ok(Flow::Continue)
}

/// Prepares one vendor audio chunk for the browser: sniffs and pins the wire
/// encoding on the first chunk, flags (but does not follow) any later
/// disagreement, and wraps pinned raw PCM16 as WAV using the session's
/// learned format descriptor.
fn prepare_audio_chunk(chunk_base64: &str, turn: &mut TurnAudio) -> Result<String, CodecError> {
    let bytes = decode_base64(chunk_base64)?;
    let sniffed = detect_format(&bytes);
    let pinned = *turn.pinned.get_or_insert_with(|| {
        info!(format = sniffed.as_str(), "Pinned session audio format");
        sniffed
    });
    if sniffed != pinned {
        warn!(
            pinned = pinned.as_str(),
            sniffed = sniffed.as_str(),
            "Mid-session format change flagged; keeping pinned classification"
        );
    }

    Ok(match pinned {
        AudioFormat::Pcm16 => encode_base64(&pcm16_to_wav(
            &bytes,
            turn.descriptor.sample_rate,
            turn.descriptor.channels,
        )),
        AudioFormat::Mp3 | AudioFormat::Wav => chunk_base64.to_string(),
    })
}

async fn send_to_browser(sink: &mut BrowserSink, msg: &ServerMessage) -> Result<()> {
    sink.send(Message::Text(serde_json::to_string(msg)?.into()))
        .await?;
    Ok(())
}

async fn send_to_vendor<T: serde::Serialize>(sink: &mut VendorSink, msg: &T) -> Result<()> {
    sink.send(WsMessage::Text(serde_json::to_string(msg)?.into()))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, router::create_router, state::AppState};
    use std::future::Future;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
    use tracing::Level;

    const WAIT: Duration = Duration::from_secs(5);

    type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
    type FakeVendorWs = WebSocketStream<TcpStream>;

    const METADATA_PCM_16000: &str = r#"{"type":"conversation_initiation_metadata","conversation_initiation_metadata_event":{"agent_output_audio_format":"pcm_16000"}}"#;

    /// Accepts one upstream connection, checks the two setup commands the
    /// relay always sends first, then hands the socket to the script.
    async fn spawn_fake_vendor<F, Fut>(script: F) -> SocketAddr
    where
        F: FnOnce(FakeVendorWs) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for expected in ["set_response_audio_format", "conversation_initiation_client_data"] {
                let msg = ws.next().await.unwrap().unwrap();
                let v: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
                assert_eq!(v["type"], expected);
            }
            script(ws).await;
        });
        addr
    }

    async fn spawn_relay(vendor_addr: SocketAddr) -> SocketAddr {
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            vendor_api_key: "test-vendor-key".to_string(),
            vendor_agent_id: "agent-1234".to_string(),
            vendor_ws_url: Some(format!("ws://{vendor_addr}")),
            log_level: Level::INFO,
        };
        let state = Arc::new(AppState::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state);
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        addr
    }

    async fn connect_client(relay: SocketAddr) -> ClientWs {
        let (ws, _) = connect_async(format!("ws://{relay}/ws")).await.unwrap();
        ws
    }

    async fn recv_json(ws: &mut ClientWs) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(WAIT, ws.next())
                .await
                .expect("timed out waiting for relay message")
                .expect("relay closed unexpectedly")
                .unwrap();
            match msg {
                WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                WsMessage::Close(_) => panic!("relay closed instead of sending a message"),
                _ => continue,
            }
        }
    }

    /// Drives the fake vendor until the session closes from the relay side.
    async fn drain_until_closed(mut ws: FakeVendorWs) {
        loop {
            match ws.next().await {
                None | Some(Ok(WsMessage::Close(_))) | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    }

    #[tokio::test]
    async fn vendor_initiation_produces_welcome() {
        let vendor = spawn_fake_vendor(|mut ws| async move {
            ws.send(WsMessage::text(METADATA_PCM_16000)).await.unwrap();
            drain_until_closed(ws).await;
        })
        .await;
        let relay = spawn_relay(vendor).await;
        let mut client = connect_client(relay).await;

        let welcome = recv_json(&mut client).await;
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["message"], "Agent ready");
    }

    #[tokio::test]
    async fn closing_downstream_closes_upstream() {
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        let vendor = spawn_fake_vendor(move |mut ws| async move {
            ws.send(WsMessage::text(METADATA_PCM_16000)).await.unwrap();
            drain_until_closed(ws).await;
            let _ = closed_tx.send(());
        })
        .await;
        let relay = spawn_relay(vendor).await;
        let mut client = connect_client(relay).await;
        recv_json(&mut client).await;

        client.close(None).await.unwrap();
        tokio::time::timeout(WAIT, closed_rx)
            .await
            .expect("upstream leg was not torn down")
            .unwrap();
    }

    #[tokio::test]
    async fn closing_upstream_closes_downstream() {
        let vendor = spawn_fake_vendor(|mut ws| async move {
            ws.send(WsMessage::text(METADATA_PCM_16000)).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;
        let relay = spawn_relay(vendor).await;
        let mut client = connect_client(relay).await;
        recv_json(&mut client).await;

        let end = tokio::time::timeout(WAIT, async {
            loop {
                match client.next().await {
                    None | Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        })
        .await;
        assert!(end.is_ok(), "downstream leg was not torn down");
    }

    #[tokio::test]
    async fn interrupt_suppresses_audio_until_turn_boundary() {
        let vendor = spawn_fake_vendor(|mut ws| async move {
            ws.send(WsMessage::text(METADATA_PCM_16000)).await.unwrap();
            // Wait for the relayed interrupt.
            loop {
                let msg = ws.next().await.unwrap().unwrap();
                if let WsMessage::Text(text) = msg {
                    let v: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                    assert_eq!(v["type"], "interrupt");
                    break;
                }
            }
            ws.send(WsMessage::text(
                r#"{"type":"interruption","interruption_event":{"reason":"user speech"}}"#,
            ))
            .await
            .unwrap();
            // Stale audio from the cancelled turn, then the turn boundary.
            ws.send(WsMessage::text(
                r#"{"type":"audio","audio_event":{"audio_base_64":"AAAA"}}"#,
            ))
            .await
            .unwrap();
            ws.send(WsMessage::text(
                r#"{"type":"agent_response","agent_response_event":{"agent_response":"Done"}}"#,
            ))
            .await
            .unwrap();
            drain_until_closed(ws).await;
        })
        .await;
        let relay = spawn_relay(vendor).await;
        let mut client = connect_client(relay).await;
        recv_json(&mut client).await;

        client
            .send(WsMessage::text(r#"{"type":"interrupt"}"#))
            .await
            .unwrap();

        // The stale chunk is dropped: the next message is the final marker.
        let marker = recv_json(&mut client).await;
        assert_eq!(marker["type"], "audio_chunk");
        assert_eq!(marker["final"], true);
        assert_eq!(marker["data"], "");
        let speech = recv_json(&mut client).await;
        assert_eq!(speech["type"], "agent_speech");
        assert_eq!(speech["message"], "Done");
    }

    #[tokio::test]
    async fn malformed_client_frame_is_dropped_not_fatal() {
        let (interrupt_tx, interrupt_rx) = tokio::sync::oneshot::channel();
        let vendor = spawn_fake_vendor(move |mut ws| async move {
            ws.send(WsMessage::text(METADATA_PCM_16000)).await.unwrap();
            loop {
                let msg = ws.next().await.unwrap().unwrap();
                if let WsMessage::Text(text) = msg {
                    let v: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                    if v["type"] == "interrupt" {
                        break;
                    }
                }
            }
            let _ = interrupt_tx.send(());
            drain_until_closed(ws).await;
        })
        .await;
        let relay = spawn_relay(vendor).await;
        let mut client = connect_client(relay).await;
        recv_json(&mut client).await;

        client
            .send(WsMessage::text("this is not json"))
            .await
            .unwrap();
        client
            .send(WsMessage::text(r#"{"type":"no_such_message"}"#))
            .await
            .unwrap();
        // The session survives both bad frames and still relays this one.
        client
            .send(WsMessage::text(r#"{"type":"interrupt"}"#))
            .await
            .unwrap();

        tokio::time::timeout(WAIT, interrupt_rx)
            .await
            .expect("session did not survive malformed frames")
            .unwrap();
    }

    #[tokio::test]
    async fn vendor_ping_answered_with_matching_event_id() {
        let (pong_tx, pong_rx) = tokio::sync::oneshot::channel();
        let vendor = spawn_fake_vendor(move |mut ws| async move {
            ws.send(WsMessage::text(METADATA_PCM_16000)).await.unwrap();
            ws.send(WsMessage::text(
                r#"{"type":"ping","ping_event":{"event_id":42}}"#,
            ))
            .await
            .unwrap();
            loop {
                let msg = ws.next().await.unwrap().unwrap();
                if let WsMessage::Text(text) = msg {
                    let v: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                    assert_eq!(v["type"], "pong");
                    assert_eq!(v["event_id"], 42);
                    break;
                }
            }
            let _ = pong_tx.send(());
            drain_until_closed(ws).await;
        })
        .await;
        let relay = spawn_relay(vendor).await;
        let mut client = connect_client(relay).await;
        recv_json(&mut client).await;

        tokio::time::timeout(WAIT, pong_rx)
            .await
            .expect("ping was not answered")
            .unwrap();
    }

    #[tokio::test]
    async fn raw_pcm_chunks_are_wrapped_as_wav() {
        let pcm = [0u8, 0, 1, 0, 255, 255, 2, 0];
        let chunk = encode_base64(&pcm);
        let vendor = spawn_fake_vendor(move |mut ws| async move {
            ws.send(WsMessage::text(
                r#"{"type":"conversation_initiation_metadata","conversation_initiation_metadata_event":{"agent_output_audio_format":"pcm_22050"}}"#,
            ))
            .await
            .unwrap();
            ws.send(WsMessage::text(format!(
                r#"{{"type":"audio","audio_event":{{"audio_base_64":"{chunk}"}}}}"#
            )))
            .await
            .unwrap();
            drain_until_closed(ws).await;
        })
        .await;
        let relay = spawn_relay(vendor).await;
        let mut client = connect_client(relay).await;
        recv_json(&mut client).await;

        let msg = recv_json(&mut client).await;
        assert_eq!(msg["type"], "audio_chunk");
        assert_eq!(msg["final"], false);
        let wav = decode_base64(msg["data"].as_str().unwrap()).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        // The sample rate comes from the initiation metadata, not a default.
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 22_050);
        assert_eq!(&wav[44..], pcm.as_slice());
    }

    #[tokio::test]
    async fn user_audio_chunk_forwarded_as_bare_envelope() {
        let (chunk_tx, chunk_rx) = tokio::sync::oneshot::channel();
        let vendor = spawn_fake_vendor(move |mut ws| async move {
            ws.send(WsMessage::text(METADATA_PCM_16000)).await.unwrap();
            loop {
                let msg = ws.next().await.unwrap().unwrap();
                if let WsMessage::Text(text) = msg {
                    let v: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                    assert_eq!(v["user_audio_chunk"], "AAAA");
                    assert!(v.get("type").is_none());
                    break;
                }
            }
            let _ = chunk_tx.send(());
            drain_until_closed(ws).await;
        })
        .await;
        let relay = spawn_relay(vendor).await;
        let mut client = connect_client(relay).await;
        recv_json(&mut client).await;

        client
            .send(WsMessage::text(
                r#"{"type":"user_audio_chunk","data":"AAAA"}"#,
            ))
            .await
            .unwrap();

        tokio::time::timeout(WAIT, chunk_rx)
            .await
            .expect("user audio was not relayed")
            .unwrap();
    }

    #[tokio::test]
    async fn vendor_error_surfaces_downstream_then_closes() {
        let vendor = spawn_fake_vendor(|mut ws| async move {
            ws.send(WsMessage::text(METADATA_PCM_16000)).await.unwrap();
            ws.send(WsMessage::text(
                r#"{"type":"error","message":"agent unavailable"}"#,
            ))
            .await
            .unwrap();
            drain_until_closed(ws).await;
        })
        .await;
        let relay = spawn_relay(vendor).await;
        let mut client = connect_client(relay).await;
        recv_json(&mut client).await;

        let err = recv_json(&mut client).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["message"], "agent unavailable");

        let end = tokio::time::timeout(WAIT, async {
            loop {
                match client.next().await {
                    None | Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        })
        .await;
        assert!(end.is_ok(), "session did not close after vendor error");
    }
}
