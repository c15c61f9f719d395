//! Voice message recording.
//!
//! A [`Microphone`] delivers [`AudioChunk`]s over a channel while a capture is
//! running. [`VoiceRecorder`] buffers them and, on stop, concatenates the
//! whole take into one WAV file wrapped in a [`VoicePayload`].
//!
//! Opening and closing a device takes time, so both are futures. Callers that
//! must keep serving other events run the recorder with [`spawn_recorder`] and
//! receive the outcome as a [`RecorderEvent`].

mod imp_cpal;

pub use imp_cpal::CpalMicrophone;

use chat_protocol::VoicePayload;
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use std::io::Cursor;
use thiserror::Error;
use tokio::sync::mpsc;

/// Preferred capture rate, mono
pub const SAMPLE_RATE: u32 = 16_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("WAV encoding error: {0}")]
    Encoding(String),
}

/// A chunk of mono samples in i16 format
#[derive(Clone, Debug)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
}

/// A running capture.
pub trait CaptureHandle: Send {
    fn sample_rate(&self) -> u32;

    /// Signal the capture to stop. The signal is sent before this returns;
    /// the future resolves once every buffered sample is on the chunk
    /// channel and the device is released.
    fn stop(self: Box<Self>) -> BoxFuture<'static, Result<(), CaptureError>>;
}

pub trait Microphone: Send {
    /// Begin capturing into `chunks`. Resolves once the device is open.
    fn start(
        &mut self,
        chunks: mpsc::UnboundedSender<AudioChunk>,
    ) -> BoxFuture<'static, Result<Box<dyn CaptureHandle>, CaptureError>>;
}

/// Encode mono 16-bit samples as a WAV file
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, CaptureError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut bytes = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)
            .map_err(|e| CaptureError::Encoding(e.to_string()))?;
        for sample in samples {
            writer
                .write_sample(*sample)
                .map_err(|e| CaptureError::Encoding(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| CaptureError::Encoding(e.to_string()))?;
    }
    Ok(bytes)
}

#[derive(Debug)]
pub enum ToggleOutcome {
    Started,
    Finished(VoicePayload),
}

struct Recording {
    handle: Box<dyn CaptureHandle>,
    chunks: mpsc::UnboundedReceiver<AudioChunk>,
}

/// Press-to-start, press-to-stop recorder. At most one recording is active.
pub struct VoiceRecorder<M: Microphone> {
    microphone: M,
    recording: Option<Recording>,
}

impl<M: Microphone> VoiceRecorder<M> {
    pub fn new(microphone: M) -> Self {
        Self {
            microphone,
            recording: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Start a recording. Returns `Ok(false)` if one is already running.
    ///
    /// A denied or missing microphone is returned as an error and leaves the
    /// recorder idle.
    pub async fn start(&mut self) -> Result<bool, CaptureError> {
        if self.recording.is_some() {
            debug!("Recording already in progress");
            return Ok(false);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.microphone.start(tx).await.map_err(|e| {
            warn!("🎤 Could not start recording: {}", e);
            e
        })?;

        info!("🎤 Recording started ({} Hz)", handle.sample_rate());
        self.recording = Some(Recording { handle, chunks: rx });
        Ok(true)
    }

    /// Finish the recording and encode everything captured as one payload.
    /// Idle recorders return `Ok(None)`.
    pub async fn stop(&mut self) -> Result<Option<VoicePayload>, CaptureError> {
        let Some(Recording { handle, mut chunks }) = self.recording.take() else {
            debug!("Stop requested while idle");
            return Ok(None);
        };

        let sample_rate = handle.sample_rate();
        handle.stop().await?;

        let mut samples = Vec::new();
        while let Ok(chunk) = chunks.try_recv() {
            samples.extend(chunk.samples);
        }
        let wav = encode_wav(&samples, sample_rate)?;
        info!(
            "🎤 Recording finished: {} samples, {} bytes",
            samples.len(),
            wav.len()
        );
        Ok(Some(VoicePayload::from_bytes(&wav)))
    }

    /// Start when idle, stop when recording
    pub async fn toggle(&mut self) -> Result<ToggleOutcome, CaptureError> {
        if self.is_recording() {
            match self.stop().await? {
                Some(payload) => Ok(ToggleOutcome::Finished(payload)),
                None => Ok(ToggleOutcome::Started),
            }
        } else {
            self.start().await?;
            Ok(ToggleOutcome::Started)
        }
    }

    /// Stop without producing a payload. The device is released in the
    /// background.
    pub fn discard(&mut self) {
        if let Some(Recording { handle, .. }) = self.recording.take() {
            drop(handle.stop());
            info!("🎤 Recording discarded");
        }
    }
}

impl<M: Microphone> Drop for VoiceRecorder<M> {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Outcome of a command sent through [`RecorderControl`]
#[derive(Debug)]
pub enum RecorderEvent {
    Started,
    Finished(VoicePayload),
    Failed(CaptureError),
}

enum RecorderCommand {
    Toggle,
    Discard,
}

/// Cheap handle for driving a recorder task. Commands never wait for the
/// device; their outcome arrives on the event channel.
#[derive(Clone)]
pub struct RecorderControl {
    commands: mpsc::UnboundedSender<RecorderCommand>,
}

impl RecorderControl {
    /// Queue a start or stop. Returns false once the task has exited.
    pub fn toggle(&self) -> bool {
        self.commands.send(RecorderCommand::Toggle).is_ok()
    }

    /// Queue dropping the current take, if any
    pub fn discard(&self) -> bool {
        self.commands.send(RecorderCommand::Discard).is_ok()
    }
}

/// Run `microphone` behind a task. Commands are handled one at a time, so
/// recordings never overlap. The task ends when every control is dropped,
/// discarding an unfinished take.
pub fn spawn_recorder<M>(
    microphone: M,
) -> (RecorderControl, mpsc::UnboundedReceiver<RecorderEvent>)
where
    M: Microphone + 'static,
{
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut recorder = VoiceRecorder::new(microphone);
        while let Some(command) = command_rx.recv().await {
            let event = match command {
                RecorderCommand::Toggle => match recorder.toggle().await {
                    Ok(ToggleOutcome::Started) => RecorderEvent::Started,
                    Ok(ToggleOutcome::Finished(payload)) => RecorderEvent::Finished(payload),
                    Err(e) => RecorderEvent::Failed(e),
                },
                RecorderCommand::Discard => {
                    recorder.discard();
                    continue;
                }
            };
            if event_tx.send(event).is_err() {
                debug!("Recorder events no longer observed");
            }
        }
        debug!("🎤 Recorder task finished");
    });

    (
        RecorderControl {
            commands: command_tx,
        },
        event_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Emits a fixed set of chunks on start and counts live captures
    struct FakeMicrophone {
        chunks: Vec<Vec<i16>>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        deny: bool,
    }

    impl FakeMicrophone {
        fn new(chunks: Vec<Vec<i16>>) -> Self {
            Self {
                chunks,
                active: Arc::new(AtomicUsize::new(0)),
                max_active: Arc::new(AtomicUsize::new(0)),
                deny: false,
            }
        }
    }

    struct FakeHandle {
        active: Arc<AtomicUsize>,
    }

    impl CaptureHandle for FakeHandle {
        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }

        fn stop(self: Box<Self>) -> BoxFuture<'static, Result<(), CaptureError>> {
            self.active.fetch_sub(1, Ordering::SeqCst);
            async { Ok(()) }.boxed()
        }
    }

    impl Microphone for FakeMicrophone {
        fn start(
            &mut self,
            chunks: mpsc::UnboundedSender<AudioChunk>,
        ) -> BoxFuture<'static, Result<Box<dyn CaptureHandle>, CaptureError>> {
            if self.deny {
                return async { Err(CaptureError::PermissionDenied("test".to_string())) }.boxed();
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            for samples in &self.chunks {
                let _ = chunks.send(AudioChunk {
                    samples: samples.clone(),
                });
            }
            let active = Arc::clone(&self.active);
            async move { Ok(Box::new(FakeHandle { active }) as Box<dyn CaptureHandle>) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_stop_concatenates_chunks_into_one_wav() {
        let mut recorder = VoiceRecorder::new(FakeMicrophone::new(vec![vec![1, 2], vec![3]]));
        assert!(recorder.start().await.unwrap());

        let payload = recorder.stop().await.unwrap().unwrap();
        let wav = payload.decode().unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3]);
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_noop() {
        let mut recorder = VoiceRecorder::new(FakeMicrophone::new(vec![vec![1]]));
        assert!(recorder.stop().await.unwrap().is_none());

        recorder.start().await.unwrap();
        assert!(recorder.stop().await.unwrap().is_some());
        assert!(recorder.stop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_toggle_never_overlaps() {
        let microphone = FakeMicrophone::new(vec![vec![0; 160]]);
        let active = Arc::clone(&microphone.active);
        let max_active = Arc::clone(&microphone.max_active);
        let mut recorder = VoiceRecorder::new(microphone);

        assert!(matches!(recorder.toggle().await.unwrap(), ToggleOutcome::Started));
        assert!(!recorder.start().await.unwrap());
        assert!(matches!(
            recorder.toggle().await.unwrap(),
            ToggleOutcome::Finished(_)
        ));
        assert!(matches!(recorder.toggle().await.unwrap(), ToggleOutcome::Started));
        assert!(matches!(
            recorder.toggle().await.unwrap(),
            ToggleOutcome::Finished(_)
        ));

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_denied_microphone_leaves_recorder_idle() {
        let mut microphone = FakeMicrophone::new(vec![]);
        microphone.deny = true;
        let mut recorder = VoiceRecorder::new(microphone);

        assert!(matches!(
            recorder.start().await,
            Err(CaptureError::PermissionDenied(_))
        ));
        assert!(!recorder.is_recording());
        assert!(recorder.stop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_recording_still_yields_payload() {
        let mut recorder = VoiceRecorder::new(FakeMicrophone::new(vec![]));
        recorder.start().await.unwrap();
        let payload = recorder.stop().await.unwrap().unwrap();
        assert!(!payload.is_empty());
    }

    #[tokio::test]
    async fn test_drop_discards_recording() {
        let microphone = FakeMicrophone::new(vec![vec![1, 2, 3]]);
        let active = Arc::clone(&microphone.active);
        let mut recorder = VoiceRecorder::new(microphone);
        recorder.start().await.unwrap();
        assert_eq!(active.load(Ordering::SeqCst), 1);

        drop(recorder);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_spawned_recorder_reports_outcomes() {
        let microphone = FakeMicrophone::new(vec![vec![5; 16]]);
        let max_active = Arc::clone(&microphone.max_active);
        let (control, mut events) = spawn_recorder(microphone);

        // Both toggles are queued before either is handled
        assert!(control.toggle());
        assert!(control.toggle());

        let wait = Duration::from_secs(1);
        let started = tokio::time::timeout(wait, events.recv()).await.unwrap();
        assert!(matches!(started, Some(RecorderEvent::Started)));
        let finished = tokio::time::timeout(wait, events.recv()).await.unwrap();
        let Some(RecorderEvent::Finished(payload)) = finished else {
            panic!("expected a finished recording");
        };
        assert!(payload.decode().unwrap().starts_with(b"RIFF"));
        assert_eq!(max_active.load(Ordering::SeqCst), 1);

        drop(control);
        let end = tokio::time::timeout(wait, events.recv()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_spawned_recorder_reports_denied_microphone() {
        let mut microphone = FakeMicrophone::new(vec![]);
        microphone.deny = true;
        let (control, mut events) = spawn_recorder(microphone);

        control.toggle();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap();
        assert!(matches!(
            event,
            Some(RecorderEvent::Failed(CaptureError::PermissionDenied(_)))
        ));
    }

    #[test]
    fn test_encode_wav_header() {
        let wav = encode_wav(&[0, 1, -1], 8_000).unwrap();
        assert!(wav.starts_with(b"RIFF"));
        assert_eq!(&wav[8..12], b"WAVE");
    }
}
