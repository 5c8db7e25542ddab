//! Command router for the command and face-model channels.
//!
//! A text frame is decoded once into a [`Command`], handled against the
//! document store and the face store, and answered on the same channel
//! with a [`Reply`] that carries the request's `request_id`. Handler
//! failures become `success: false` replies; they never end the loop.

use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use jarvis_shared::models::FaceModel;
use jarvis_shared::protocol::{
    Command, Envelope, EventList, FaceAction, Inbound, ModelList, Reply, ReplyBody,
};
use jarvis_shared::types::ConnectionId;
use jarvis_store::{DocumentStore, StoreError};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::channels::Frame;
use crate::face_store::FaceStore;
use crate::registry::ConnectionRegistry;

pub struct CommandRouter {
    store: Arc<DocumentStore>,
    faces: Arc<FaceStore>,
}

/// `(success, error)` pair shared by every mutation reply.
type Outcome = (bool, Option<String>);

fn outcome<T>(command: &str, result: &Result<T, String>) -> Outcome {
    match result {
        Ok(_) => (true, None),
        Err(message) => {
            debug!(command, error = %message, "Command failed");
            (false, Some(message.clone()))
        }
    }
}

/// Log a store failure at a level matching its fault class.
fn store_failure(command: &str, err: StoreError) -> String {
    match &err {
        StoreError::NotFound { .. } | StoreError::Duplicate { .. } | StoreError::Invalid(_) => {
            debug!(command, error = %err, "Command rejected");
        }
        _ => error!(command, error = %err, "Storage fault"),
    }
    err.to_string()
}

impl CommandRouter {
    pub fn new(store: Arc<DocumentStore>, faces: Arc<FaceStore>) -> Self {
        Self { store, faces }
    }

    /// Answer one inbound text frame. `frames` is the rest of the channel;
    /// `save_model` reads its image from it.
    pub async fn handle_text<F>(&self, text: &str, frames: &mut F) -> Reply
    where
        F: Stream<Item = Frame> + Unpin,
    {
        match Inbound::decode(text) {
            Inbound::Text(text) => Reply::echo(None, text),
            Inbound::Invalid {
                request_id,
                text,
                reason,
            } => {
                debug!(%reason, "Malformed command, echoing");
                Reply::echo(request_id, text)
            }
            Inbound::Command(Envelope {
                request_id,
                command,
            }) => Reply::new(request_id, self.dispatch(command, text, frames).await),
        }
    }

    async fn dispatch<F>(&self, command: Command, text: &str, frames: &mut F) -> ReplyBody
    where
        F: Stream<Item = Frame> + Unpin,
    {
        let name = command.name().to_string();
        match command {
            Command::GetSettings => ReplyBody::SettingsResponse {
                payload: self.store.settings().await,
            },
            Command::SaveSettings(patch) => {
                let result = self
                    .store
                    .save_settings(&patch)
                    .await
                    .map_err(|e| store_failure(&name, e));
                let (success, error) = outcome(&name, &result);
                ReplyBody::SaveSettingsResponse { success, error }
            }
            Command::GetEvents => ReplyBody::EventsResponse {
                payload: EventList {
                    events: self.store.events().await,
                },
            },
            Command::SaveEvent(payload) => {
                let result = self
                    .store
                    .save_event(payload)
                    .await
                    .map_err(|e| store_failure(&name, e));
                let (success, error) = outcome(&name, &result);
                ReplyBody::SaveEventResponse {
                    success,
                    payload: result.ok(),
                    error,
                }
            }
            Command::UpdateEvent(payload) => {
                let result = self
                    .store
                    .update_event(payload)
                    .await
                    .map_err(|e| store_failure(&name, e));
                let (success, error) = outcome(&name, &result);
                ReplyBody::UpdateEventResponse { success, error }
            }
            Command::DeleteEvent { id } => {
                let result = match id {
                    Some(id) => self
                        .store
                        .delete_event(&id)
                        .await
                        .map_err(|e| store_failure(&name, e)),
                    None => Err("delete_event requires an id".to_string()),
                };
                let (success, error) = outcome(&name, &result);
                ReplyBody::DeleteEventResponse { success, error }
            }
            Command::FaceRecognition(FaceAction::GetModels) => {
                ReplyBody::FaceRecognitionModelsResponse {
                    payload: ModelList {
                        models: self.store.face_models().await,
                    },
                }
            }
            Command::FaceRecognition(FaceAction::SaveModel(metadata)) => {
                let result = match next_upload(frames).await {
                    Ok(image) => self.save_model(metadata, &image).await,
                    Err(message) => Err(message),
                };
                let (success, error) = outcome(&name, &result);
                ReplyBody::FaceRecognitionSaveResponse {
                    success,
                    payload: result.ok(),
                    error,
                }
            }
            Command::FaceRecognition(FaceAction::DeleteModel { id }) => {
                let result = match id {
                    Some(id) => self.delete_model(&id).await,
                    None => Err("delete_model requires an id".to_string()),
                };
                let (success, error) = outcome(&name, &result);
                ReplyBody::FaceRecognitionDeleteResponse { success, error }
            }
            Command::Unknown { kind } => {
                debug!(kind = %kind, "Unknown command, echoing");
                ReplyBody::Echo {
                    message: text.to_string(),
                    timestamp: chrono::Utc::now(),
                }
            }
        }
    }

    /// Persist the image first, then the record. If the record cannot be
    /// written the image is removed again.
    async fn save_model(
        &self,
        metadata: Map<String, Value>,
        image: &[u8],
    ) -> Result<FaceModel, String> {
        let extension = metadata.get("extension").and_then(Value::as_str);
        let stored = self
            .faces
            .store_image(image, extension)
            .await
            .map_err(|e| {
                warn!(error = %e, "Face image rejected");
                e.to_string()
            })?;

        // Recorded under the configured directory, not the resolved host path.
        let filepath = self.faces.base_path().join(&stored.filename);
        let model = FaceModel::new(
            stored.id,
            stored.filename.clone(),
            filepath.display().to_string(),
            metadata,
        );

        if let Err(e) = self.store.add_face_model(model.clone()).await {
            if let Err(cleanup) = self.faces.delete_image(&stored.filename).await {
                warn!(filename = %stored.filename, error = %cleanup, "Orphaned face image");
            }
            return Err(store_failure("face_recognition/save_model", e));
        }

        info!(
            id = %model.id,
            size = image.len(),
            name = ?model.name(),
            path = %stored.path.display(),
            "Face model saved"
        );
        Ok(model)
    }

    /// The record is authoritative: once it is gone the delete succeeds,
    /// whatever happens to the file.
    async fn delete_model(&self, id: &str) -> Result<(), String> {
        let model = self
            .store
            .remove_face_model(id)
            .await
            .map_err(|e| store_failure("face_recognition/delete_model", e))?;

        match self.faces.delete_image(&model.filename).await {
            Ok(()) => info!(id = %model.id, "Face model and image deleted"),
            Err(e) => warn!(
                id = %model.id,
                filename = %model.filename,
                error = %e,
                "Face model deleted but image could not be removed"
            ),
        }
        Ok(())
    }
}

/// The binary frame that must directly follow a `save_model` command.
async fn next_upload<F>(frames: &mut F) -> Result<Vec<u8>, String>
where
    F: Stream<Item = Frame> + Unpin,
{
    match frames.next().await {
        Some(Frame::Binary(data)) => Ok(data),
        Some(Frame::Text(_)) => Err("expected a binary image frame after save_model".to_string()),
        Some(Frame::Close) | None => Err("channel closed before the image arrived".to_string()),
    }
}

/// Request/reply loop of one command or face-model channel.
pub async fn serve_commands<F>(
    router: &CommandRouter,
    registry: &ConnectionRegistry,
    id: ConnectionId,
    mut frames: F,
) where
    F: Stream<Item = Frame> + Unpin,
{
    while let Some(frame) = frames.next().await {
        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(data) => {
                debug!(connection = %id.short(), bytes = data.len(), "Unexpected binary frame ignored");
                continue;
            }
            Frame::Close => break,
        };

        let reply = router.handle_text(&text, &mut frames).await;
        let json = match reply.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize reply");
                continue;
            }
        };

        if !registry.send(id, Message::Text(json)).await.is_delivered() {
            break;
        }
    }
}
