//! Microphone pipeline: block-average downsampling to 16 kHz, 16-bit PCM
//! quantization, and base64 packaging into `audio` messages.
//!
//! Everything here runs inside the capture callback, so it is O(buffer),
//! never awaits, and reuses its scratch buffers across calls.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::message::ClientMessage;

pub const TARGET_SAMPLE_RATE: u32 = 16_000;
pub const PCM_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Downsamples to [`TARGET_SAMPLE_RATE`] by averaging consecutive windows.
pub fn downsample_to_16k(samples: &[f32], native_rate: u32) -> Vec<f32> {
    let mut out = Vec::new();
    downsample_into(samples, native_rate, TARGET_SAMPLE_RATE, &mut out);
    out
}

/// Each output sample is the mean of the input window
/// `[floor(i * ratio), floor((i + 1) * ratio))`. The output has
/// `ceil(len / ratio)` samples, so the last window takes whatever input
/// remains, however short. Rates at or below the target pass through.
pub fn downsample_into(samples: &[f32], native_rate: u32, target_rate: u32, out: &mut Vec<f32>) {
    out.clear();
    if samples.is_empty() {
        return;
    }
    if target_rate == 0 || native_rate <= target_rate {
        out.extend_from_slice(samples);
        return;
    }

    let ratio = f64::from(native_rate) / f64::from(target_rate);
    let out_len = (samples.len() as f64 / ratio).ceil() as usize;
    out.reserve(out_len);

    let mut start = 0usize;
    for i in 0..out_len {
        let end = if i + 1 == out_len {
            samples.len()
        } else {
            (((i + 1) as f64 * ratio).floor() as usize).min(samples.len())
        };
        // ratio > 1 keeps every window non-empty
        let window = &samples[start..end];
        let sum: f32 = window.iter().sum();
        out.push(sum / window.len() as f32);
        start = end;
    }
}

/// Clamps to [-1, 1] then scales asymmetrically so that -1.0 maps to
/// `i16::MIN` and 1.0 to `i16::MAX`.
pub fn quantize_sample(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

pub fn quantize_into(samples: &[f32], out: &mut Vec<i16>) {
    out.clear();
    out.extend(samples.iter().map(|&sample| quantize_sample(sample)));
}

pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len());
    quantize_into(samples, &mut out);
    out
}

pub fn encode_pcm16_base64(pcm: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for sample in pcm {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Stateful encoder owned by one capture session.
pub struct AudioChunkEncoder {
    native_rate: u32,
    resampled: Vec<f32>,
    pcm: Vec<i16>,
    bytes: Vec<u8>,
}

impl AudioChunkEncoder {
    pub fn new(native_rate: u32) -> Self {
        Self {
            native_rate,
            resampled: Vec::new(),
            pcm: Vec::new(),
            bytes: Vec::new(),
        }
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    /// Returns `None` for empty buffers, which would otherwise produce an
    /// invalid `audio` message.
    pub fn encode(&mut self, buffer: &[f32], timestamp: i64) -> Option<ClientMessage> {
        downsample_into(buffer, self.native_rate, TARGET_SAMPLE_RATE, &mut self.resampled);
        if self.resampled.is_empty() {
            return None;
        }

        quantize_into(&self.resampled, &mut self.pcm);
        self.bytes.clear();
        for sample in &self.pcm {
            self.bytes.extend_from_slice(&sample.to_le_bytes());
        }

        let sample_rate = if self.native_rate > TARGET_SAMPLE_RATE {
            TARGET_SAMPLE_RATE
        } else {
            self.native_rate
        };

        Some(ClientMessage::Audio {
            audio: STANDARD.encode(&self.bytes),
            mime_type: if sample_rate == TARGET_SAMPLE_RATE {
                PCM_MIME_TYPE.to_string()
            } else {
                format!("audio/pcm;rate={sample_rate}")
            },
            sample_rate,
            timestamp,
        })
    }
}
