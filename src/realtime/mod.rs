//! Streaming protocol between the field client and the assistant backend.

pub mod audio;
pub mod capture;
pub mod channel;
pub mod message;
pub mod video;
pub mod workflow;

pub use audio::{downsample_to_16k, float_to_pcm16, AudioChunkEncoder, TARGET_SAMPLE_RATE};
pub use capture::{AudioRecorder, AudioSource, CameraStream, FrameSource};
pub use channel::RealtimeChannel;
pub use message::{ClientMessage, ProtocolError, ServerMessage};
pub use video::RgbFrame;
pub use workflow::{parse_workflow_confirmation, WorkflowConfirmation, WorkflowStatus};
