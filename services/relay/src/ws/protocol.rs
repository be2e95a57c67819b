//! Defines the WebSocket message protocol between the browser client and the relay.

use serde::{Deserialize, Serialize};

/// Messages sent from the client (browser) to the relay.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Signals that the user has activated the agent UI.
    #[serde(rename = "activate_agent")]
    ActivateAgent,
    /// Asks the vendor to stop producing audio for the current turn. Does
    /// not close the session.
    #[serde(rename = "interrupt")]
    Interrupt,
    /// A base64-encoded PCM16 microphone chunk at the canonical 16 kHz.
    #[serde(rename = "user_audio_chunk")]
    UserAudioChunk { data: String },
}

/// Messages sent from the relay to the client (browser).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The vendor session is initialized and ready to talk.
    Welcome { message: String },
    /// A chunk of agent audio (base64). `final: true` carries an empty
    /// payload and marks the end of the current turn's audio.
    AudioChunk {
        data: String,
        #[serde(rename = "final")]
        is_final: bool,
    },
    /// The completed text of what the agent said.
    AgentSpeech { message: String },
    /// Reports a session-fatal error to the client.
    Error { message: String },
}
