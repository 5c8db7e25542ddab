//! Wake-word detection over a stream of audio frames.
//!
//! A session owns one decoder and always has an utterance open. Each frame
//! is fed in; when the hypothesis names the wake word with enough
//! confidence a detection is reported and the utterance is restarted, so
//! one spoken wake word yields exactly one event.

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use jarvis_shared::events::DetectionEvent;
use jarvis_shared::types::ConnectionId;
use tracing::{debug, error, info, warn};

use crate::audio::decode_frame;
use crate::channels::Frame;
use crate::decoder::{DecoderError, DecoderFactory, KeywordDecoder};
use crate::registry::ConnectionRegistry;

pub struct WakeWordSession {
    decoder: Box<dyn KeywordDecoder>,
    wake_word: String,
    threshold: f32,
}

impl WakeWordSession {
    pub fn new(
        mut decoder: Box<dyn KeywordDecoder>,
        wake_word: &str,
        threshold: f32,
    ) -> Result<Self, DecoderError> {
        decoder.start_utterance()?;
        Ok(Self {
            decoder,
            wake_word: wake_word.to_lowercase(),
            threshold,
        })
    }

    pub fn feed(&mut self, samples: &[i16]) -> Result<Option<DetectionEvent>, DecoderError> {
        self.decoder.process(samples)?;

        let Some(hypothesis) = self.decoder.hypothesis() else {
            return Ok(None);
        };
        let text = hypothesis.text.to_lowercase();
        if text.is_empty() {
            return Ok(None);
        }
        debug!(hypothesis = %text, confidence = hypothesis.confidence, "Decoder hypothesis");

        if !text.contains(&self.wake_word) || hypothesis.confidence < self.threshold {
            return Ok(None);
        }

        self.restart_utterance();
        Ok(Some(DetectionEvent::WakewordDetected {
            word: text,
            confidence: hypothesis.confidence,
        }))
    }

    /// A detection stands even if the decoder misbehaves while resetting.
    fn restart_utterance(&mut self) {
        if let Err(e) = self.decoder.end_utterance() {
            warn!(error = %e, "Failed to end utterance after detection");
        }
        if let Err(e) = self.decoder.start_utterance() {
            warn!(error = %e, "Failed to restart utterance, retrying");
            if let Err(e) = self.decoder.start_utterance() {
                error!(error = %e, "Utterance could not be restarted");
            }
        }
    }

    pub fn close(mut self) {
        if let Err(e) = self.decoder.end_utterance() {
            debug!(error = %e, "Failed to end utterance on close");
        }
    }
}

/// Detection loop of one wake-word channel. Malformed frames are skipped;
/// the channel stays open.
pub async fn run<F>(
    registry: &ConnectionRegistry,
    id: ConnectionId,
    decoders: &dyn DecoderFactory,
    wake_word: &str,
    threshold: f32,
    mut frames: F,
) where
    F: Stream<Item = Frame> + Unpin,
{
    let session = decoders
        .create()
        .and_then(|decoder| WakeWordSession::new(decoder, wake_word, threshold));
    let mut session = match session {
        Ok(session) => session,
        Err(e) => {
            error!(connection = %id.short(), error = %e, "Cannot start wake-word session");
            return;
        }
    };

    while let Some(frame) = frames.next().await {
        let data = match frame {
            Frame::Binary(data) => data,
            Frame::Text(_) => {
                debug!(connection = %id.short(), "Ignoring text frame on wake-word channel");
                continue;
            }
            Frame::Close => break,
        };

        let samples = match decode_frame(&data) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(connection = %id.short(), bytes = data.len(), error = %e, "Skipping audio frame");
                continue;
            }
        };

        let detection = match session.feed(&samples) {
            Ok(Some(detection)) => detection,
            Ok(None) => continue,
            Err(e) => {
                warn!(connection = %id.short(), error = %e, "Decoder rejected frame");
                continue;
            }
        };

        info!(connection = %id.short(), ?detection, "Wake word detected");
        let json = match serde_json::to_string(&detection) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize detection");
                continue;
            }
        };
        if !registry.send(id, Message::Text(json)).await.is_delivered() {
            break;
        }
    }

    session.close();
    debug!(connection = %id.short(), "Wake-word loop ended");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::decoder::{Hypothesis, SilentDecoderFactory};
    use futures::channel::mpsc;
    use futures::stream;
    use jarvis_shared::types::ChannelKind;
    use parking_lot::Mutex;

    /// Hears whatever the most recent frame's first sample selects.
    #[derive(Default)]
    struct ScriptedDecoder {
        heard: Option<Hypothesis>,
        log: Arc<Mutex<Vec<&'static str>>>,
        /// Remaining `start_utterance` calls that fail, after the first.
        failing_restarts: usize,
        fail_end: bool,
        started: bool,
    }

    impl KeywordDecoder for ScriptedDecoder {
        fn start_utterance(&mut self) -> Result<(), DecoderError> {
            self.log.lock().push("start");
            if self.started && self.failing_restarts > 0 {
                self.failing_restarts -= 1;
                return Err(DecoderError::Decode("busy".into()));
            }
            self.started = true;
            self.heard = None;
            Ok(())
        }

        fn process(&mut self, samples: &[i16]) -> Result<(), DecoderError> {
            self.heard = match samples.first() {
                Some(1) => Some(Hypothesis {
                    text: "Hey JARVIS".into(),
                    confidence: 0.9,
                }),
                Some(2) => Some(Hypothesis {
                    text: "jarvis".into(),
                    confidence: 0.1,
                }),
                Some(3) => Some(Hypothesis {
                    text: "hello".into(),
                    confidence: 0.9,
                }),
                Some(4) => return Err(DecoderError::Decode("bad".into())),
                _ => self.heard.take(),
            };
            Ok(())
        }

        fn hypothesis(&self) -> Option<Hypothesis> {
            self.heard.clone()
        }

        fn end_utterance(&mut self) -> Result<(), DecoderError> {
            self.log.lock().push("end");
            if self.fail_end {
                return Err(DecoderError::Decode("stuck".into()));
            }
            Ok(())
        }
    }

    struct ScriptedFactory;

    impl DecoderFactory for ScriptedFactory {
        fn create(&self) -> Result<Box<dyn KeywordDecoder>, DecoderError> {
            Ok(Box::new(ScriptedDecoder::default()))
        }
    }

    fn pcm(first: i16) -> Vec<u8> {
        [first, 0, 0, 0].iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_detection_restarts_utterance() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let decoder = ScriptedDecoder {
            log: log.clone(),
            ..ScriptedDecoder::default()
        };
        let mut session = WakeWordSession::new(Box::new(decoder), "Jarvis", 0.5).unwrap();

        let event = session.feed(&[1, 0]).unwrap();
        assert_eq!(
            event,
            Some(DetectionEvent::WakewordDetected {
                word: "hey jarvis".into(),
                confidence: 0.9
            })
        );
        // The restarted utterance has no hypothesis left over.
        assert_eq!(session.feed(&[0]).unwrap(), None);

        session.close();
        assert_eq!(*log.lock(), vec!["start", "end", "start", "end"]);
    }

    #[test]
    fn test_detection_survives_failed_restart() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let decoder = ScriptedDecoder {
            log: log.clone(),
            fail_end: true,
            failing_restarts: 1,
            ..ScriptedDecoder::default()
        };
        let mut session = WakeWordSession::new(Box::new(decoder), "jarvis", 0.5).unwrap();

        let event = session.feed(&[1]).unwrap();
        assert!(matches!(
            event,
            Some(DetectionEvent::WakewordDetected { ref word, .. }) if word == "hey jarvis"
        ));
        // end fails, first restart fails, the retry succeeds.
        assert_eq!(*log.lock(), vec!["start", "end", "start", "start"]);

        // The retried utterance starts fresh, so the next frame hears nothing.
        assert_eq!(session.feed(&[0]).unwrap(), None);
        assert!(session.feed(&[1]).unwrap().is_some());
    }

    #[test]
    fn test_threshold_and_word_required() {
        let mut session =
            WakeWordSession::new(Box::new(ScriptedDecoder::default()), "jarvis", 0.5).unwrap();
        assert_eq!(session.feed(&[2]).unwrap(), None);
        assert_eq!(session.feed(&[3]).unwrap(), None);
        assert!(session.feed(&[4]).is_err());
    }

    #[tokio::test]
    async fn test_run_reports_one_event_and_skips_malformed() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        registry.admit(id, ChannelKind::WakeWord, tx).await;

        let frames = stream::iter(vec![
            Frame::Binary(vec![1, 2, 3]),
            Frame::Binary(pcm(3)),
            Frame::Text("noise".into()),
            Frame::Binary(pcm(1)),
            Frame::Binary(pcm(0)),
            Frame::Binary(pcm(4)),
            Frame::Close,
        ]);
        run(&registry, id, &ScriptedFactory, "jarvis", 0.5, frames).await;

        let Ok(Some(Message::Text(text))) = rx.try_next() else {
            panic!("expected one detection");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], serde_json::json!("wakeword_detected"));
        assert_eq!(value["word"], serde_json::json!("hey jarvis"));
        assert!(rx.try_next().is_err());
    }

    #[tokio::test]
    async fn test_silent_decoder_never_detects() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        registry.admit(id, ChannelKind::WakeWord, tx).await;

        let frames = stream::iter(vec![Frame::Binary(pcm(1)), Frame::Binary(pcm(1))]);
        run(&registry, id, &SilentDecoderFactory, "jarvis", 0.5, frames).await;
        assert!(rx.try_next().is_err());
    }
}
