//! Wire vocabulary spoken with the relay's `/ws` endpoint, mirrored locally
//! so this crate stays decoupled from the server internals.

use serde::{Deserialize, Serialize};

/// Messages the relay pushes to this client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Welcome {
        message: String,
    },
    AudioChunk {
        data: String,
        #[serde(rename = "final")]
        is_final: bool,
    },
    AgentSpeech {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Messages this client sends to the relay.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    ActivateAgent,
    Interrupt,
    UserAudioChunk { data: String },
}

impl ClientCommand {
    pub fn to_json(&self) -> String {
        // The command enum has no unserializable states.
        serde_json::to_string(self).expect("client command serializes")
    }
}
