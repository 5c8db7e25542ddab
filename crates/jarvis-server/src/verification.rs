//! Face verification channel.
//!
//! Every binary frame is an image to identify against the active face
//! models. The similarity search is delegated to a [`FaceMatcher`] and runs
//! on the blocking pool.

use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use jarvis_shared::models::FaceModel;
use jarvis_shared::protocol::{Reply, ReplyBody, VerificationResult};
use jarvis_shared::types::ConnectionId;
use jarvis_store::DocumentStore;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::channels::Frame;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Face matching engine unavailable")]
    Unavailable,

    #[error("Face matching failed: {0}")]
    Engine(String),
}

/// Closest known face to a probe image.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    /// File name of the matching model's image.
    pub filename: String,
    pub distance: f32,
}

pub trait FaceMatcher: Send + Sync {
    /// Find the best match for `image` among `candidates`, or `None` when no
    /// candidate is close enough.
    fn find_match(
        &self,
        image: &[u8],
        candidates: &[FaceModel],
    ) -> Result<Option<FaceMatch>, MatchError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Used when no face-embedding engine is linked in.
#[derive(Debug, Default)]
pub struct UnavailableMatcher;

impl FaceMatcher for UnavailableMatcher {
    fn find_match(
        &self,
        _image: &[u8],
        _candidates: &[FaceModel],
    ) -> Result<Option<FaceMatch>, MatchError> {
        Err(MatchError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}

pub async fn verify(
    matcher: Arc<dyn FaceMatcher>,
    store: &DocumentStore,
    image: Vec<u8>,
) -> Result<VerificationResult, MatchError> {
    let candidates: Vec<FaceModel> = store
        .face_models()
        .await
        .into_iter()
        .filter(|m| m.is_active)
        .collect();

    let (found, candidates) = tokio::task::spawn_blocking(move || {
        let found = matcher.find_match(&image, &candidates);
        (found, candidates)
    })
    .await
    .map_err(|e| MatchError::Engine(e.to_string()))?;

    let Some(found) = found? else {
        return Ok(VerificationResult {
            matched: None,
            distance: None,
        });
    };

    let matched = candidates.into_iter().find(|m| m.filename == found.filename);
    if matched.is_none() {
        debug!(filename = %found.filename, "Match does not belong to an active model");
    }
    Ok(VerificationResult {
        distance: matched.as_ref().map(|_| found.distance),
        matched,
    })
}

pub async fn run<F>(
    registry: &ConnectionRegistry,
    id: ConnectionId,
    matcher: Arc<dyn FaceMatcher>,
    store: Arc<DocumentStore>,
    mut frames: F,
) where
    F: Stream<Item = Frame> + Unpin,
{
    while let Some(frame) = frames.next().await {
        let image = match frame {
            Frame::Binary(image) => image,
            Frame::Text(_) => {
                debug!(connection = %id.short(), "Ignoring text frame on verification channel");
                continue;
            }
            Frame::Close => break,
        };

        let body = match verify(matcher.clone(), &store, image).await {
            Ok(result) => {
                info!(
                    connection = %id.short(),
                    matched = result.matched.is_some(),
                    "Face verification finished"
                );
                ReplyBody::FaceVerificationResponse {
                    success: true,
                    payload: Some(result),
                    error: None,
                }
            }
            Err(e) => {
                debug!(connection = %id.short(), error = %e, "Face verification failed");
                ReplyBody::FaceVerificationResponse {
                    success: false,
                    payload: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let json = match Reply::new(None, body).to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize verification reply");
                continue;
            }
        };
        if !registry.send(id, Message::Text(json)).await.is_delivered() {
            break;
        }
    }
    debug!(connection = %id.short(), "Verification loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::stream;
    use jarvis_shared::types::ChannelKind;
    use serde_json::{json, Map, Value};
    use uuid::Uuid;

    /// Matches the candidate whose name equals the image bytes.
    struct NameMatcher;

    impl FaceMatcher for NameMatcher {
        fn find_match(
            &self,
            image: &[u8],
            candidates: &[FaceModel],
        ) -> Result<Option<FaceMatch>, MatchError> {
            let wanted = String::from_utf8_lossy(image);
            Ok(candidates
                .iter()
                .find(|m| m.name() == Some(wanted.as_ref()))
                .map(|m| FaceMatch {
                    filename: m.filename.clone(),
                    distance: 0.25,
                }))
        }
    }

    async fn store_with(models: &[(&str, bool)]) -> Arc<DocumentStore> {
        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        for (name, active) in models {
            let id = Uuid::new_v4();
            let mut metadata = Map::new();
            metadata.insert("name".into(), Value::from(*name));
            metadata.insert("isActive".into(), Value::from(*active));
            let model = FaceModel::new(id, format!("{id}.jpg"), format!("faces/{id}.jpg"), metadata);
            store.add_face_model(model).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_verify_finds_active_model() {
        let store = store_with(&[("ada", true), ("grace", false)]).await;

        let result = verify(Arc::new(NameMatcher), &store, b"ada".to_vec()).await.unwrap();
        assert_eq!(result.matched.unwrap().name(), Some("ada"));
        assert_eq!(result.distance, Some(0.25));

        let result = verify(Arc::new(NameMatcher), &store, b"grace".to_vec()).await.unwrap();
        assert!(result.matched.is_none());
        assert!(result.distance.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_matcher_fails() {
        let store = store_with(&[]).await;
        let err = verify(Arc::new(UnavailableMatcher), &store, vec![1]).await.unwrap_err();
        assert!(matches!(err, MatchError::Unavailable));
    }

    #[tokio::test]
    async fn test_run_replies_per_image() {
        let store = store_with(&[("ada", true)]).await;
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        registry.admit(id, ChannelKind::FaceVerification, tx).await;

        let frames = stream::iter(vec![
            Frame::Binary(b"ada".to_vec()),
            Frame::Text("hello".into()),
            Frame::Binary(b"nobody".to_vec()),
        ]);
        run(&registry, id, Arc::new(NameMatcher), store, frames).await;

        let mut replies = Vec::new();
        while let Ok(Some(Message::Text(text))) = rx.try_next() {
            replies.push(serde_json::from_str::<Value>(&text).unwrap());
        }
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["type"], json!("face_verification_response"));
        assert_eq!(replies[0]["success"], json!(true));
        assert_eq!(replies[0]["payload"]["match"]["name"], json!("ada"));
        assert_eq!(replies[1]["payload"]["match"], Value::Null);
    }
}
