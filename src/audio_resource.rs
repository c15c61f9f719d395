use log::{debug, warn};
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::{Builder, TempPath};

use crate::error::Result;

/// Playable copy of a voice message, written to disk so any audio player can
/// open it.
///
/// Owned by exactly one timeline event. [`AudioResource::release`] deletes the
/// file; dropping an unreleased resource deletes it as well.
#[derive(Debug)]
pub struct AudioResource {
    path: Option<TempPath>,
    byte_len: usize,
    duration: Option<Duration>,
}

impl AudioResource {
    /// Write `bytes` to a fresh file under `dir`
    pub fn materialize(bytes: &[u8], dir: &Path) -> Result<Self> {
        let extension = sniff_extension(bytes);
        let mut file = Builder::new()
            .prefix("voice-")
            .suffix(&format!(".{extension}"))
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;

        let path = file.into_temp_path();
        let duration = wav_duration(bytes);
        debug!(
            "🎵 Materialized {} byte voice message at {}",
            bytes.len(),
            path.display()
        );

        Ok(Self {
            path: Some(path),
            byte_len: bytes.len(),
            duration,
        })
    }

    /// Location of the playable file, `None` once released
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Playback length, known only for WAV payloads
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn is_released(&self) -> bool {
        self.path.is_none()
    }

    /// Delete the backing file. Returns false if it was already released.
    pub fn release(&mut self) -> bool {
        match self.path.take() {
            Some(path) => {
                let display = path.display().to_string();
                if let Err(e) = path.close() {
                    warn!("Failed to remove voice message {}: {}", display, e);
                }
                true
            }
            None => false,
        }
    }
}

fn sniff_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"RIFF") {
        "wav"
    } else if bytes.starts_with(b"OggS") {
        "ogg"
    } else if bytes.starts_with(&[0x1a, 0x45, 0xdf, 0xa3]) {
        "webm"
    } else {
        "audio"
    }
}

fn wav_duration(bytes: &[u8]) -> Option<Duration> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(
        f64::from(reader.duration()) / f64::from(sample_rate),
    ))
}
