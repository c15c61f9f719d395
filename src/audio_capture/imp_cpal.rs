use super::{AudioChunk, CaptureError, CaptureHandle, Microphone, SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use futures_util::future::{BoxFuture, FutureExt};
use std::sync::mpsc as std_mpsc;
use tokio::sync::{mpsc, oneshot};

const CHUNK_SIZE: usize = 1024;

/// Microphone backed by CPAL.
///
/// `cpal::Stream` is not `Send` on every backend, so each recording owns a
/// dedicated thread that builds, runs and drops the stream. The async side
/// only ever waits on oneshot channels from that thread.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    /// Input device name, `None` for the system default
    device_id: Option<String>,
    /// Channel to record (0-based index)
    channel: u32,
}

impl CpalMicrophone {
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            device_id,
            channel: 0,
        }
    }

    pub fn with_channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    /// Names of the available input devices
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| CaptureError::Device(format!("Failed to enumerate devices: {}", e)))?;
        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }
}

impl Microphone for CpalMicrophone {
    fn start(
        &mut self,
        chunks: mpsc::UnboundedSender<AudioChunk>,
    ) -> BoxFuture<'static, Result<Box<dyn CaptureHandle>, CaptureError>> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32, CaptureError>>();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_id = self.device_id.clone();
        let channel = self.channel;

        let spawned = std::thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(device_id.as_deref(), channel, chunks) {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Parked until stop() or the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("CPAL: capture stream closed");
                let _ = done_tx.send(());
            });

        async move {
            spawned.map_err(|e| {
                CaptureError::Stream(format!("Failed to spawn capture thread: {}", e))
            })?;
            let sample_rate = ready_rx
                .await
                .map_err(|_| CaptureError::Stream("Capture thread exited early".to_string()))??;

            Ok(Box::new(CpalCapture {
                stop: stop_tx,
                done: done_rx,
                sample_rate,
            }) as Box<dyn CaptureHandle>)
        }
        .boxed()
    }
}

struct CpalCapture {
    stop: std_mpsc::Sender<()>,
    done: oneshot::Receiver<()>,
    sample_rate: u32,
}

impl CaptureHandle for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(self: Box<Self>) -> BoxFuture<'static, Result<(), CaptureError>> {
        let CpalCapture { stop, done, .. } = *self;
        let _ = stop.send(());
        async move {
            done.await
                .map_err(|_| CaptureError::Stream("Capture thread panicked".to_string()))
        }
        .boxed()
    }
}

/// Groups samples into chunks; whatever is left is sent when dropped, which
/// happens when the stream and its callback are torn down.
struct ChunkBuffer {
    samples: Vec<i16>,
    tx: mpsc::UnboundedSender<AudioChunk>,
}

impl ChunkBuffer {
    fn push(&mut self, sample: i16) {
        self.samples.push(sample);
        if self.samples.len() >= CHUNK_SIZE {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.samples.is_empty() {
            return;
        }
        let chunk = AudioChunk {
            samples: std::mem::replace(&mut self.samples, Vec::with_capacity(CHUNK_SIZE)),
        };
        let _ = self.tx.send(chunk);
    }
}

impl Drop for ChunkBuffer {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open_stream(
    device_id: Option<&str>,
    channel: u32,
    chunks: mpsc::UnboundedSender<AudioChunk>,
) -> Result<(Stream, u32), CaptureError> {
    let host = cpal::default_host();

    let device = if let Some(id) = device_id {
        host.input_devices()
            .map_err(|e| CaptureError::Device(format!("Failed to enumerate devices: {}", e)))?
            .find(|d| d.name().map(|n| n == id).unwrap_or(false))
            .ok_or_else(|| CaptureError::Device(format!("Device '{}' not found", id)))?
    } else {
        host.default_input_device()
            .ok_or_else(|| CaptureError::Device("No default input device available".into()))?
    };

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| CaptureError::Config(e.to_string()))?
        .find(|config| {
            config.min_sample_rate().0 <= SAMPLE_RATE && config.max_sample_rate().0 >= SAMPLE_RATE
        })
        .map(|config| config.with_sample_rate(cpal::SampleRate(SAMPLE_RATE)));

    // Without native 16kHz support record at the device rate; the WAV header
    // carries whatever rate was used.
    let supported_config = match supported_config {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| CaptureError::Config(e.to_string()))?,
    };

    if channel >= u32::from(supported_config.channels()) {
        return Err(CaptureError::Config(format!(
            "Selected channel {} is not available (device has {} channels)",
            channel,
            supported_config.channels()
        )));
    }

    let sample_rate = supported_config.sample_rate().0;
    let stream_config = supported_config.config();
    log::info!(
        "CPAL: recording {} channels @ {}Hz (format: {:?})",
        stream_config.channels,
        sample_rate,
        supported_config.sample_format()
    );

    let buffer = ChunkBuffer {
        samples: Vec::with_capacity(CHUNK_SIZE),
        tx: chunks,
    };

    let stream = match supported_config.sample_format() {
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, buffer, channel)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, buffer, channel)?,
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, buffer, channel)?,
        format => {
            return Err(CaptureError::Config(format!(
                "Unsupported format: {:?}",
                format
            )))
        }
    };

    stream.play().map_err(|e| match e {
        cpal::PlayStreamError::DeviceNotAvailable => {
            CaptureError::Device("Device is no longer available".to_string())
        }
        other => CaptureError::Stream(format!("Failed to start stream: {}", other)),
    })?;

    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut buffer: ChunkBuffer,
    channel: u32,
) -> Result<Stream, CaptureError>
where
    T: Sample + SizedSample + Send + Sync + 'static,
    i16: FromSample<T>,
{
    let channels = usize::from(config.channels);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    if let Some(sample) = frame.get(channel as usize) {
                        buffer.push(i16::from_sample(*sample));
                    }
                }
            },
            |err| log::error!("CPAL stream error: {}", err),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::Device("Device is no longer available".to_string())
            }
            cpal::BuildStreamError::BackendSpecific { err }
                if err.description.to_lowercase().contains("permission") =>
            {
                CaptureError::PermissionDenied(err.description)
            }
            other => CaptureError::Stream(format!("Failed to build stream: {}", other)),
        })
}
