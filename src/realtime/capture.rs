//! Scoped ownership of microphone and camera devices.
//!
//! A device is acquired by `start` and released by `stop`, by `Drop`, and on
//! every failed start. Once `stop` returns no further message is produced.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::mpsc;

use super::audio::AudioChunkEncoder;
use super::message::ClientMessage;
use super::video::{encode_jpeg_data_url, RgbFrame, DEFAULT_JPEG_QUALITY};

pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Platform microphone. Buffers arrive on the device's own cadence.
pub trait AudioSource: Send {
    fn native_rate(&self) -> u32;

    fn start(&mut self, callback: SampleCallback) -> Result<()>;

    /// Releases the device. The callback must not run after this returns.
    fn stop(&mut self);
}

/// Platform camera producing frames on demand.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<()>;

    fn grab(&mut self) -> Result<RgbFrame>;

    fn close(&mut self);
}

struct ActiveRecording {
    source: Box<dyn AudioSource>,
    gate: Arc<AtomicBool>,
}

pub struct AudioRecorder {
    active: Option<ActiveRecording>,
}

impl Default for AudioRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioRecorder {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Starts streaming encoded `audio` messages into `sink`. Chunks are
    /// dropped rather than awaited when the sink is full.
    pub fn start(
        &mut self,
        mut source: Box<dyn AudioSource>,
        sink: mpsc::Sender<ClientMessage>,
    ) -> Result<()> {
        if self.active.is_some() {
            bail!("recording already active");
        }

        let gate = Arc::new(AtomicBool::new(true));
        let callback_gate = gate.clone();
        let mut encoder = AudioChunkEncoder::new(source.native_rate());

        let callback: SampleCallback = Box::new(move |buffer: &[f32]| {
            if !callback_gate.load(Ordering::Acquire) {
                return;
            }
            if let Some(message) = encoder.encode(buffer, Utc::now().timestamp_millis()) {
                let _ = sink.try_send(message);
            }
        });

        if let Err(err) = source.start(callback) {
            gate.store(false, Ordering::Release);
            source.stop();
            return Err(err.context("failed to start audio capture"));
        }

        self.active = Some(ActiveRecording { source, gate });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut recording) = self.active.take() {
            recording.gate.store(false, Ordering::Release);
            recording.source.stop();
        }
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct CameraStream {
    source: Option<Box<dyn FrameSource>>,
    quality: u8,
}

impl Default for CameraStream {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraStream {
    pub fn new() -> Self {
        Self {
            source: None,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn is_active(&self) -> bool {
        self.source.is_some()
    }

    pub fn start(&mut self, mut source: Box<dyn FrameSource>) -> Result<()> {
        if self.source.is_some() {
            bail!("camera already active");
        }
        if let Err(err) = source.open() {
            source.close();
            return Err(err.context("failed to open camera"));
        }
        self.source = Some(source);
        Ok(())
    }

    /// Grabs the current frame as a JPEG data URL, also used for snapshots.
    pub fn snapshot_data_url(&mut self) -> Result<String> {
        let Some(source) = self.source.as_mut() else {
            bail!("camera is not active");
        };
        let frame = source.grab()?;
        encode_jpeg_data_url(&frame, self.quality)
    }

    pub fn capture_frame(&mut self) -> Result<ClientMessage> {
        let frame = self.snapshot_data_url()?;
        Ok(ClientMessage::VideoFrame {
            frame,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    pub fn stop(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct DeviceLog {
        started: bool,
        stopped: bool,
    }

    /// Holds on to the callback so tests can push buffers after stop, the way
    /// a late hardware callback would.
    struct FakeMic {
        log: Arc<Mutex<DeviceLog>>,
        callback: Arc<Mutex<Option<SampleCallback>>>,
        fail_start: bool,
    }

    impl AudioSource for FakeMic {
        fn native_rate(&self) -> u32 {
            48_000
        }

        fn start(&mut self, callback: SampleCallback) -> Result<()> {
            if self.fail_start {
                bail!("device busy");
            }
            self.log.lock().unwrap().started = true;
            *self.callback.lock().unwrap() = Some(callback);
            Ok(())
        }

        fn stop(&mut self) {
            self.log.lock().unwrap().stopped = true;
        }
    }

    fn push(callback: &Arc<Mutex<Option<SampleCallback>>>, buffer: &[f32]) {
        if let Some(cb) = callback.lock().unwrap().as_mut() {
            cb(buffer);
        }
    }

    #[test]
    fn recorder_streams_until_stopped() {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let callback = Arc::new(Mutex::new(None));
        let (tx, mut rx) = mpsc::channel(8);

        let mut recorder = AudioRecorder::new();
        recorder
            .start(
                Box::new(FakeMic {
                    log: log.clone(),
                    callback: callback.clone(),
                    fail_start: false,
                }),
                tx,
            )
            .unwrap();
        assert!(recorder.is_recording());

        push(&callback, &[0.5; 1024]);
        let message = rx.try_recv().unwrap();
        assert_eq!(message.type_name(), "audio");

        recorder.stop();
        assert!(log.lock().unwrap().stopped);
        assert!(!recorder.is_recording());

        push(&callback, &[0.5; 1024]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_start_releases_device() {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let (tx, _rx) = mpsc::channel(1);
        let mut recorder = AudioRecorder::new();

        let result = recorder.start(
            Box::new(FakeMic {
                log: log.clone(),
                callback: Arc::new(Mutex::new(None)),
                fail_start: true,
            }),
            tx,
        );

        assert!(result.is_err());
        assert!(!recorder.is_recording());
        let log = log.lock().unwrap();
        assert!(!log.started);
        assert!(log.stopped);
    }

    #[test]
    fn dropping_recorder_releases_device() {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let (tx, _rx) = mpsc::channel(1);
        {
            let mut recorder = AudioRecorder::new();
            recorder
                .start(
                    Box::new(FakeMic {
                        log: log.clone(),
                        callback: Arc::new(Mutex::new(None)),
                        fail_start: false,
                    }),
                    tx,
                )
                .unwrap();
        }
        assert!(log.lock().unwrap().stopped);
    }

    struct FakeCamera {
        closed: Arc<AtomicBool>,
    }

    impl FrameSource for FakeCamera {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn grab(&mut self) -> Result<RgbFrame> {
            Ok(RgbFrame {
                width: 4,
                height: 4,
                pixels: vec![200; 48],
            })
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn camera_produces_video_frames_and_closes() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut camera = CameraStream::new();
        assert!(camera.capture_frame().is_err());

        camera
            .start(Box::new(FakeCamera {
                closed: closed.clone(),
            }))
            .unwrap();

        match camera.capture_frame().unwrap() {
            ClientMessage::VideoFrame { frame, .. } => {
                assert!(frame.starts_with("data:image/jpeg;base64,"))
            }
            other => panic!("unexpected message {other:?}"),
        }

        camera.stop();
        assert!(closed.load(Ordering::SeqCst));
        assert!(!camera.is_active());
    }
}
