use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command '{0}' requires an object payload")]
    MissingPayload(String),

    #[error("Command 'face_recognition' requires an action")]
    MissingAction,

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}
