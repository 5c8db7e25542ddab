//! Decoding of inbound audio frames.
//!
//! A frame is either a complete WAV file (16-bit integer samples) or a bare
//! run of little-endian PCM16 samples. Multi-channel WAV is averaged to mono.

use std::io::Cursor;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Empty audio frame")]
    Empty,

    #[error("Raw PCM frame has odd length {0}")]
    OddLength(usize),

    #[error("Unsupported WAV format: {bits}-bit {format:?}")]
    Unsupported {
        bits: u16,
        format: hound::SampleFormat,
    },

    #[error("Malformed WAV: {0}")]
    Wav(#[from] hound::Error),
}

pub fn decode_frame(data: &[u8]) -> Result<Vec<i16>, AudioError> {
    if data.is_empty() {
        return Err(AudioError::Empty);
    }
    if data.starts_with(b"RIFF") {
        return decode_wav(data);
    }
    if data.len() % 2 != 0 {
        return Err(AudioError::OddLength(data.len()));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

fn decode_wav(data: &[u8]) -> Result<Vec<i16>, AudioError> {
    let mut reader = hound::WavReader::new(Cursor::new(data))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(AudioError::Unsupported {
            bits: spec.bits_per_sample,
            format: spec.sample_format,
        });
    }

    let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    let channels = usize::from(spec.channels.max(1));
    if channels == 1 {
        return Ok(samples);
    }

    Ok(samples
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect())
}
