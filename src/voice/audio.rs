//! Audio format checks for uploaded and synthesized audio

use std::io::Cursor;

use crate::{Error, Result};

/// Audio formats accepted for transcription, with upload file extensions
const SUPPORTED_FORMATS: &[(&str, &str)] = &[
    ("audio/wav", "wav"),
    ("audio/x-wav", "wav"),
    ("audio/wave", "wav"),
    ("audio/mpeg", "mp3"),
    ("audio/mp3", "mp3"),
    ("audio/mp4", "m4a"),
    ("audio/m4a", "m4a"),
    ("audio/x-m4a", "m4a"),
    ("audio/webm", "webm"),
    ("audio/ogg", "ogg"),
    ("audio/flac", "flac"),
    ("audio/x-flac", "flac"),
];

/// Basic facts about a WAV stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Samples per channel
    pub frames: u32,
}

impl WavInfo {
    /// Duration in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        u64::from(self.frames) * 1000 / u64::from(self.sample_rate)
    }
}

/// File extension for a supported MIME type
///
/// Parameters such as `;codecs=opus` are ignored.
#[must_use]
pub fn extension_for(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    SUPPORTED_FORMATS
        .iter()
        .find(|(m, _)| *m == essence)
        .map(|(_, ext)| *ext)
}

/// Check that `bytes` hold a readable WAV stream
///
/// # Errors
///
/// Returns `Audio` if the header can't be parsed or the stream is empty
pub fn validate_wav(bytes: &[u8]) -> Result<WavInfo> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::Audio(format!("invalid WAV data: {e}")))?;

    let spec = reader.spec();
    let info = WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        frames: reader.duration(),
    };

    if info.frames == 0 {
        return Err(Error::Audio("WAV stream contains no samples".to_string()));
    }

    tracing::debug!(
        sample_rate = info.sample_rate,
        channels = info.channels,
        duration_ms = info.duration_ms(),
        "validated WAV audio"
    );
    Ok(info)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Mono 16-bit sine tone encoded as WAV
    pub(crate) fn sine_wav(sample_rate: u32, seconds: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
            let count = (sample_rate as f32 * seconds) as u32;
            for i in 0..count {
                #[allow(clippy::cast_precision_loss)]
                let t = i as f32 / sample_rate as f32;
                #[allow(clippy::cast_possible_truncation)]
                let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn accepts_valid_wav() {
        let info = validate_wav(&sine_wav(16_000, 0.5)).unwrap();
        assert_eq!(info.sample_rate, 16_000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.frames, 8000);
        assert_eq!(info.duration_ms(), 500);
    }

    #[test]
    fn rejects_garbage_and_empty_wav() {
        assert!(matches!(validate_wav(b"not a wav"), Err(Error::Audio(_))));
        assert!(matches!(validate_wav(&sine_wav(16_000, 0.0)), Err(Error::Audio(_))));
    }

    #[test]
    fn maps_mime_types() {
        assert_eq!(extension_for("audio/wav"), Some("wav"));
        assert_eq!(extension_for("audio/webm;codecs=opus"), Some("webm"));
        assert_eq!(extension_for("Audio/MPEG"), Some("mp3"));
        assert_eq!(extension_for("video/mp4"), None);
    }
}
