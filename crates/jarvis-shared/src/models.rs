//! The settings document and the records it owns.
//!
//! Field names on the wire follow what the desktop client sends, so most
//! fields carry an explicit `serde(rename)`. Keys the server does not know
//! about are preserved in the `extra`/`fields`/`metadata` maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::constants::{EVENTS_KEY, FACE_MODELS_KEY};
use crate::error::ProtocolError;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

/// The single settings record of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "useVideo")]
    pub use_video: bool,
    pub theme: Theme,
    pub notifications: bool,
    pub auto_update: bool,
    pub city: String,
    #[serde(rename = "use24hrFormat")]
    pub use_24hr_format: bool,
    #[serde(rename = "useFaceRecognition")]
    pub use_face_recognition: bool,
    #[serde(rename = "faceRecognitionModels")]
    pub face_models: Vec<FaceModel>,
    pub events: Vec<Event>,
    /// Options written by a client that the server has no typed field for.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_video: true,
            theme: Theme::Dark,
            notifications: true,
            auto_update: false,
            city: "New York".to_string(),
            use_24hr_format: false,
            use_face_recognition: false,
            face_models: Vec::new(),
            events: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl Settings {
    /// Merge-write the supplied options into this record.
    ///
    /// The owned collections (`events`, `faceRecognitionModels`) are skipped.
    /// If any known option has the wrong type the record is left untouched.
    pub fn merge(&mut self, patch: &Map<String, Value>) -> Result<(), ProtocolError> {
        let mut current = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => return Err(ProtocolError::InvalidRecord("settings is not an object".into())),
        };

        for (key, value) in patch {
            if key == EVENTS_KEY || key == FACE_MODELS_KEY {
                continue;
            }
            current.insert(key.clone(), value.clone());
        }

        *self = serde_json::from_value(Value::Object(current))
            .map_err(|e| ProtocolError::InvalidRecord(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A calendar event. `id` is supplied by the client and is the join key for
/// update and delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    /// Build an event from a client payload, moving `dateTime` into `time`.
    pub fn from_payload(mut payload: Map<String, Value>) -> Result<Self, ProtocolError> {
        if let Some(date_time) = payload.remove("dateTime") {
            payload.insert("time".to_string(), date_time);
        }

        match payload.get("id") {
            Some(Value::String(id)) if !id.is_empty() => {}
            Some(_) => {
                return Err(ProtocolError::InvalidRecord(
                    "event id must be a non-empty string".into(),
                ))
            }
            None => return Err(ProtocolError::InvalidRecord("event has no id".into())),
        }

        serde_json::from_value(Value::Object(payload))
            .map_err(|e| ProtocolError::InvalidRecord(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// FaceModel
// ---------------------------------------------------------------------------

/// Keys assigned by the server; a client cannot set them through metadata.
const FACE_MODEL_RESERVED: [&str; 5] = ["id", "filename", "filepath", "uploaded_at", "isActive"];

/// A stored reference face. Owns exactly one image file in the managed
/// faces directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceModel {
    pub id: Uuid,
    pub filename: String,
    pub filepath: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    /// Caller metadata (`name`, `extension`, ...).
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl FaceModel {
    /// Combine the server-assigned identity of a stored image with the
    /// metadata the client sent along with it.
    pub fn new(
        id: Uuid,
        filename: String,
        filepath: String,
        mut metadata: Map<String, Value>,
    ) -> Self {
        let is_active = metadata
            .get("isActive")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        for key in FACE_MODEL_RESERVED {
            metadata.remove(key);
        }

        Self {
            id,
            filename,
            filepath,
            uploaded_at: Utc::now(),
            is_active,
            metadata,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name").and_then(Value::as_str)
    }
}
