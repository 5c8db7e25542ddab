//! Keyword-spotting decoder seam.
//!
//! The speech engine itself lives outside this crate. A decoder consumes
//! PCM samples within an utterance and exposes its current best hypothesis.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Decoding failed: {0}")]
    Decode(String),
}

/// Best guess of what was said so far in the current utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub text: String,
    /// In `0..=1`.
    pub confidence: f32,
}

pub trait KeywordDecoder: Send {
    fn start_utterance(&mut self) -> Result<(), DecoderError>;

    /// Feed mono 16-bit samples into the current utterance.
    fn process(&mut self, samples: &[i16]) -> Result<(), DecoderError>;

    fn hypothesis(&self) -> Option<Hypothesis>;

    fn end_utterance(&mut self) -> Result<(), DecoderError>;
}

/// One decoder per wake-word channel.
pub trait DecoderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn KeywordDecoder>, DecoderError>;

    /// Whether created decoders can ever produce a hypothesis.
    fn is_functional(&self) -> bool {
        true
    }
}

/// Accepts audio and never hears anything. Used when no speech engine is
/// linked in.
#[derive(Debug, Default)]
pub struct SilentDecoder;

impl KeywordDecoder for SilentDecoder {
    fn start_utterance(&mut self) -> Result<(), DecoderError> {
        Ok(())
    }

    fn process(&mut self, _samples: &[i16]) -> Result<(), DecoderError> {
        Ok(())
    }

    fn hypothesis(&self) -> Option<Hypothesis> {
        None
    }

    fn end_utterance(&mut self) -> Result<(), DecoderError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SilentDecoderFactory;

impl DecoderFactory for SilentDecoderFactory {
    fn create(&self) -> Result<Box<dyn KeywordDecoder>, DecoderError> {
        Ok(Box::new(SilentDecoder))
    }

    fn is_functional(&self) -> bool {
        false
    }
}
