//! Vendor-facing message vocabulary and upstream dialing.
//!
//! The vendor protocol is defined by the conversational-agent API and only
//! partially covered here: the tags below are the ones the relay translates.
//! Anything else deserializes to [`VendorEvent::Unknown`] and is ignored.

use crate::config::Config;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::client::IntoClientRequest,
};

pub type VendorStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens the upstream connection. The static API key travels in a
/// connection header, never in a message body.
pub async fn connect(config: &Config) -> Result<VendorStream> {
    let mut request = config.vendor_url().into_client_request()?;
    request.headers_mut().insert(
        "xi-api-key",
        config
            .vendor_api_key
            .parse()
            .context("Vendor API key is not a valid header value")?,
    );

    let (stream, _) = connect_async(request)
        .await
        .context("Failed to connect to vendor realtime WebSocket")?;
    Ok(stream)
}

// --- Vendor → relay events ---

/// Events the vendor sends over the upstream socket.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VendorEvent {
    /// Session metadata, including the agent's output audio format label.
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadata,
    },
    /// One streamed chunk of agent audio, base64 encoded.
    Audio { audio_event: AudioEvent },
    /// The completed text of the agent's current turn.
    AgentResponse {
        agent_response_event: AgentResponseEvent,
    },
    /// Transcription of what the vendor heard from the user.
    UserTranscript {
        user_transcription_event: UserTranscriptEvent,
    },
    /// Acknowledges that the current response was cancelled.
    Interruption {
        interruption_event: Option<InterruptionEvent>,
    },
    /// Keepalive; must be answered with a pong carrying the same event id.
    Ping { ping_event: PingEvent },
    /// The vendor reported a failure; the session ends after this.
    Error { message: Option<String> },
    #[serde(other)]
    Unknown,
}

/// Only the output format label is consumed; other metadata fields the
/// vendor sends alongside it are ignored.
#[derive(Deserialize, Debug, Default)]
pub struct InitiationMetadata {
    pub agent_output_audio_format: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct AudioEvent {
    pub audio_base_64: String,
}

#[derive(Deserialize, Debug)]
pub struct AgentResponseEvent {
    pub agent_response: String,
}

#[derive(Deserialize, Debug)]
pub struct UserTranscriptEvent {
    pub user_transcript: String,
}

#[derive(Deserialize, Debug)]
pub struct InterruptionEvent {
    pub reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct PingEvent {
    pub event_id: u64,
}

// --- Relay → vendor commands ---

/// Commands the relay sends over the upstream socket.
#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VendorCommand {
    /// Negotiates the response audio encoding right after connect.
    SetResponseAudioFormat {
        response_audio_format: ResponseAudioFormat,
    },
    /// Starts the conversation.
    ConversationInitiationClientData,
    /// Answer to a vendor keepalive ping.
    Pong { event_id: u64 },
    /// Cancel the current response. The vendor acknowledges with an
    /// `interruption` event.
    Interrupt,
}

#[derive(Serialize, Debug)]
pub struct ResponseAudioFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub sample_rate: u32,
    pub bitrate_bps: u32,
}

impl ResponseAudioFormat {
    /// MP3 at 44.1 kHz / 128 kbps, the encoding requested at session start.
    /// The relay still handles a PCM16 fallback by sniffing each session's
    /// first chunk.
    pub fn mp3_default() -> Self {
        Self {
            kind: "mp3".to_string(),
            sample_rate: 44_100,
            bitrate_bps: 128_000,
        }
    }
}

/// User microphone audio forwarded upstream. The vendor expects this as a
/// bare-field envelope without a `type` tag.
#[derive(Serialize, Debug)]
pub struct UserAudioFrame {
    pub user_audio_chunk: String,
}
