//! Frames the server pushes without a request: telemetry snapshots and
//! wake-word detections.

use serde::{Deserialize, Serialize};

/// One telemetry cycle. Key names match what the dashboard reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySnapshot {
    #[serde(rename = "CPU")]
    pub cpu: f32,
    #[serde(rename = "Memory")]
    pub memory: f32,
    /// Smoothed link utilization, always within `0..=100`.
    #[serde(rename = "Network")]
    pub network: f64,
    /// First GPU device, 0 when there is none.
    #[serde(rename = "GPU")]
    pub gpu: f32,
    #[serde(rename = "UP_TIME")]
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DetectionEvent {
    WakewordDetected { word: String, confidence: f32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_wire_keys() {
        let snapshot = TelemetrySnapshot {
            cpu: 12.5,
            memory: 40.0,
            network: 0.0,
            gpu: 0.0,
            uptime_secs: 3600,
        };
        let value = serde_json::to_value(snapshot).unwrap();
        assert_eq!(value["CPU"], json!(12.5));
        assert_eq!(value["UP_TIME"], json!(3600));
        assert!(value.get("cpu").is_none());
    }

    #[test]
    fn test_detection_wire_shape() {
        let event = DetectionEvent::WakewordDetected {
            word: "hey jarvis".into(),
            confidence: 0.75,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], json!("wakeword_detected"));
        assert_eq!(value["word"], json!("hey jarvis"));
    }
}
