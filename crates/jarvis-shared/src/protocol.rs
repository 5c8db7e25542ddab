//! JSON command protocol of the command channel.
//!
//! Every inbound text frame is decoded exactly once into an [`Inbound`]:
//! either a typed [`Envelope`] or, when the frame is not a command object,
//! the original text which the server echoes back. Replies are [`Reply`]
//! values that always carry the request's `request_id` verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::models::{Event, FaceModel, Settings};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(Envelope),
    /// A command object whose payload or action does not fit its `type`.
    /// The correlation id survives so the echo can still be matched.
    Invalid {
        request_id: Option<Value>,
        text: String,
        reason: String,
    },
    /// Not a command object; answered with an echo.
    Text(String),
}

impl Inbound {
    pub fn decode(text: &str) -> Self {
        let raw: RawFrame = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(_) => return Inbound::Text(text.to_string()),
        };
        let request_id = raw.request_id.clone();
        match Envelope::from_raw(raw) {
            Ok(envelope) => Inbound::Command(envelope),
            Err(e) => Inbound::Invalid {
                request_id,
                text: text.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

/// A command together with its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Opaque; echoed back untouched. `None` if the client sent none.
    pub request_id: Option<Value>,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetSettings,
    SaveSettings(Map<String, Value>),
    GetEvents,
    SaveEvent(Map<String, Value>),
    UpdateEvent(Map<String, Value>),
    DeleteEvent { id: Option<String> },
    FaceRecognition(FaceAction),
    /// Well-formed frame with a discriminator the server does not handle.
    Unknown { kind: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FaceAction {
    GetModels,
    /// Metadata for the image carried by the next binary frame.
    SaveModel(Map<String, Value>),
    DeleteModel { id: Option<String> },
}

/// Wire shape before the discriminator is resolved.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    request_id: Option<Value>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Self::from_raw(serde_json::from_str(text)?)
    }

    fn from_raw(raw: RawFrame) -> Result<Self, ProtocolError> {
        let command = Command::from_raw(&raw.kind, raw.action.as_deref(), raw.payload)?;
        Ok(Self {
            request_id: raw.request_id,
            command,
        })
    }
}

impl Command {
    fn from_raw(
        kind: &str,
        action: Option<&str>,
        payload: Option<Value>,
    ) -> Result<Self, ProtocolError> {
        let command = match kind {
            "get_settings" => Command::GetSettings,
            "save_settings" => Command::SaveSettings(require_object(kind, payload)?),
            "get_events" => Command::GetEvents,
            "save_event" => Command::SaveEvent(require_object(kind, payload)?),
            "update_event" => Command::UpdateEvent(require_object(kind, payload)?),
            "delete_event" => Command::DeleteEvent {
                id: payload_id(payload.as_ref()),
            },
            "face_recognition" => match action.ok_or(ProtocolError::MissingAction)? {
                "get_models" => Command::FaceRecognition(FaceAction::GetModels),
                "save_model" => Command::FaceRecognition(FaceAction::SaveModel(
                    optional_object(kind, payload)?,
                )),
                "delete_model" => Command::FaceRecognition(FaceAction::DeleteModel {
                    id: payload_id(payload.as_ref()),
                }),
                other => Command::Unknown {
                    kind: format!("face_recognition/{other}"),
                },
            },
            other => Command::Unknown {
                kind: other.to_string(),
            },
        };
        Ok(command)
    }

    /// Discriminator name used in logs.
    pub fn name(&self) -> &str {
        match self {
            Command::GetSettings => "get_settings",
            Command::SaveSettings(_) => "save_settings",
            Command::GetEvents => "get_events",
            Command::SaveEvent(_) => "save_event",
            Command::UpdateEvent(_) => "update_event",
            Command::DeleteEvent { .. } => "delete_event",
            Command::FaceRecognition(FaceAction::GetModels) => "face_recognition/get_models",
            Command::FaceRecognition(FaceAction::SaveModel(_)) => "face_recognition/save_model",
            Command::FaceRecognition(FaceAction::DeleteModel { .. }) => {
                "face_recognition/delete_model"
            }
            Command::Unknown { kind } => kind,
        }
    }
}

fn require_object(kind: &str, payload: Option<Value>) -> Result<Map<String, Value>, ProtocolError> {
    match payload {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(ProtocolError::MissingPayload(kind.to_string())),
    }
}

fn optional_object(
    kind: &str,
    payload: Option<Value>,
) -> Result<Map<String, Value>, ProtocolError> {
    match payload {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(ProtocolError::MissingPayload(kind.to_string())),
    }
}

fn payload_id(payload: Option<&Value>) -> Option<String> {
    payload?
        .get("id")?
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A reply frame: the body's `type` plus the echoed `request_id`.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    #[serde(flatten)]
    pub body: ReplyBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyBody {
    SettingsResponse {
        payload: Settings,
    },
    SaveSettingsResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    EventsResponse {
        payload: EventList,
    },
    SaveEventResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Event>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    UpdateEventResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    DeleteEventResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    FaceRecognitionModelsResponse {
        payload: ModelList,
    },
    FaceRecognitionSaveResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<FaceModel>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    FaceRecognitionDeleteResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    FaceVerificationResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<VerificationResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Echo {
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// Broadcast to command channels when one of them goes away.
    ClientDisconnected,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventList {
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub models: Vec<FaceModel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    #[serde(rename = "match")]
    pub matched: Option<FaceModel>,
    pub distance: Option<f32>,
}

impl Reply {
    pub fn new(request_id: Option<Value>, body: ReplyBody) -> Self {
        Self { request_id, body }
    }

    /// Fallback reply for a frame that is not a command.
    pub fn echo(request_id: Option<Value>, text: impl Into<String>) -> Self {
        Self::new(
            request_id,
            ReplyBody::Echo {
                message: text.into(),
                timestamp: Utc::now(),
            },
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
