/// Application name
pub const APP_NAME: &str = "Jarvis";

/// Default HTTP/WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Route of the JSON command channel
pub const ROUTE_COMMAND: &str = "/communicate";

/// Route of the telemetry push channel
pub const ROUTE_TELEMETRY: &str = "/info";

/// Route of the wake-word audio channel
pub const ROUTE_WAKE_WORD: &str = "/hotword";

/// Route of the face-model upload channel
pub const ROUTE_FACE_MODEL: &str = "/face_recognition";

/// Route of the face-verification channel
pub const ROUTE_FACE_VERIFICATION: &str = "/face-verification";

/// Seconds between two telemetry snapshots
pub const TELEMETRY_INTERVAL_SECS: u64 = 5;

/// Lower bound for the elapsed time between two network samples
pub const NETWORK_MIN_ELAPSED_SECS: f64 = 1e-6;

/// Token searched for in decoder hypotheses
pub const DEFAULT_WAKE_WORD: &str = "jarvis";

/// Minimum hypothesis confidence for a detection
pub const DEFAULT_WAKE_THRESHOLD: f32 = 0.5;

/// Maximum face image upload size in bytes (10 MiB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Extension used when an upload does not name one
pub const DEFAULT_IMAGE_EXTENSION: &str = ".jpg";

/// Settings keys that hold owned collections and are never merge-written
pub const EVENTS_KEY: &str = "events";
pub const FACE_MODELS_KEY: &str = "faceRecognitionModels";
