use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::workflow::{parse_workflow_confirmation, WorkflowConfirmation};

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("audio message carries no samples")]
    EmptyAudio,
    #[error("realtime channel is closed")]
    Closed,
    #[error("realtime transport error: {0}")]
    Transport(String),
}

/// Messages sent from the client to the assistant backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Audio {
        /// Base64 of little-endian 16-bit PCM.
        audio: String,
        mime_type: String,
        sample_rate: u32,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    VideoFrame { frame: String, timestamp: i64 },
    #[serde(rename_all = "camelCase")]
    InspectionContext { inspection_id: String },
}

impl ClientMessage {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientMessage::Audio { audio, .. } if audio.is_empty() => Err(ProtocolError::EmptyAudio),
            _ => Ok(()),
        }
    }

    /// Decodes and validates an inbound client frame. Frames that fail are
    /// dropped by the caller and never forwarded.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let message: ClientMessage =
            serde_json::from_str(raw).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        self.validate()?;
        serde_json::to_string(self).map_err(|err| ProtocolError::Malformed(err.to_string()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Audio { .. } => "audio",
            ClientMessage::VideoFrame { .. } => "video_frame",
            ClientMessage::InspectionContext { .. } => "inspection_context",
        }
    }
}

/// Messages pushed by the assistant backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Transcript {
        text: String,
        #[serde(default)]
        role: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SafetyFlag {
        hazard: String,
        #[serde(default)]
        severity: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FaultDetected {
        component: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        confidence: Option<f32>,
    },
    WorkflowConfirmation(WorkflowConfirmation),
}

impl ServerMessage {
    /// Decodes a server frame. Transcript lines using the older
    /// `WF_CONFIRM|...` convention are lifted into `WorkflowConfirmation`.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let message: ServerMessage =
            serde_json::from_str(raw).map_err(|err| ProtocolError::Malformed(err.to_string()))?;

        Ok(match message {
            ServerMessage::Transcript { text, role } => match parse_workflow_confirmation(&text) {
                Some(confirmation) => ServerMessage::WorkflowConfirmation(confirmation),
                None => ServerMessage::Transcript { text, role },
            },
            other => other,
        })
    }
}
