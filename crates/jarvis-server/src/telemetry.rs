//! Periodic host telemetry push.
//!
//! Each telemetry channel runs its own timer loop. The network figure is a
//! rate, so it needs the previous byte counter; that state lives in one
//! [`NetworkSmoother`] shared by every telemetry channel of the process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use jarvis_shared::constants::NETWORK_MIN_ELAPSED_SECS;
use jarvis_shared::events::TelemetrySnapshot;
use jarvis_shared::types::ConnectionId;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::channels::Frame;
use crate::probe::{HostProbe, HostSample};
use crate::registry::ConnectionRegistry;

/// Converts a cumulative byte counter into a link utilization percentage.
#[derive(Debug, Default)]
pub struct NetworkSmoother {
    previous: Mutex<Option<(u64, Instant)>>,
}

impl NetworkSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a counter reading taken at `now` and return utilization in
    /// `0..=100`. The first reading ever observed yields 0.
    pub fn observe(&self, curr_bytes: u64, now: Instant, capacity_bps: u64) -> f64 {
        let previous = self.previous.lock().replace((curr_bytes, now));
        let Some((prev_bytes, prev_time)) = previous else {
            return 0.0;
        };

        // Counters can go backwards when an interface disappears.
        let delta_bytes = curr_bytes.saturating_sub(prev_bytes);
        let delta_t = now
            .saturating_duration_since(prev_time)
            .as_secs_f64()
            .max(NETWORK_MIN_ELAPSED_SECS);
        utilization(delta_bytes as f64 * 8.0 / delta_t, capacity_bps)
    }
}

pub fn utilization(bits_per_second: f64, capacity_bps: u64) -> f64 {
    if capacity_bps == 0 {
        return 0.0;
    }
    (bits_per_second / capacity_bps as f64 * 100.0).clamp(0.0, 100.0)
}

pub fn snapshot(sample: &HostSample, smoother: &NetworkSmoother, now: Instant) -> TelemetrySnapshot {
    TelemetrySnapshot {
        cpu: sample.cpu_percent,
        memory: sample.memory_percent,
        network: smoother.observe(sample.net_bytes, now, sample.link_capacity_bps),
        gpu: sample.gpu_percent.unwrap_or(0.0),
        uptime_secs: sample.uptime_secs,
    }
}

/// Push a snapshot every `period` until the channel closes or a send fails.
/// Inbound frames are read only to notice the close.
pub async fn run<F>(
    registry: &ConnectionRegistry,
    id: ConnectionId,
    mut probe: Box<dyn HostProbe>,
    smoother: Arc<NetworkSmoother>,
    period: Duration,
    mut frames: F,
) where
    F: Stream<Item = Frame> + Unpin,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !registry.contains(id).await {
                    break;
                }

                let sample = probe.sample();
                let snapshot = snapshot(&sample, &smoother, Instant::now());
                let json = match serde_json::to_string(&snapshot) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize telemetry");
                        continue;
                    }
                };
                if !registry.send(id, Message::Text(json)).await.is_delivered() {
                    break;
                }
            }
            frame = frames.next() => match frame {
                Some(Frame::Close) | None => break,
                Some(_) => debug!(connection = %id.short(), "Ignoring inbound telemetry frame"),
            }
        }
    }
    debug!(connection = %id.short(), "Telemetry loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::stream;
    use jarvis_shared::types::ChannelKind;

    struct ScriptedProbe {
        bytes: u64,
    }

    impl HostProbe for ScriptedProbe {
        fn sample(&mut self) -> HostSample {
            self.bytes += 1_000;
            HostSample {
                cpu_percent: 25.0,
                memory_percent: 50.0,
                uptime_secs: 42,
                net_bytes: self.bytes,
                link_capacity_bps: 1_000_000,
                gpu_percent: None,
            }
        }
    }

    #[test]
    fn test_first_observation_is_zero() {
        let smoother = NetworkSmoother::new();
        assert_eq!(smoother.observe(u64::MAX, Instant::now(), 1_000), 0.0);
    }

    #[test]
    fn test_utilization_from_delta() {
        let smoother = NetworkSmoother::new();
        let t0 = Instant::now();
        smoother.observe(1_000, t0, 80_000);
        // 1000 bytes over 1s = 8000 b/s against 80 kb/s.
        let value = smoother.observe(2_000, t0 + Duration::from_secs(1), 80_000);
        assert!((value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_utilization_is_clamped() {
        let smoother = NetworkSmoother::new();
        let t0 = Instant::now();
        smoother.observe(0, t0, 1);
        assert_eq!(smoother.observe(u64::MAX / 16, t0, 1), 100.0);
    }

    #[test]
    fn test_unknown_capacity_reports_zero() {
        let smoother = NetworkSmoother::new();
        let t0 = Instant::now();
        smoother.observe(0, t0, 0);
        assert_eq!(smoother.observe(10_000, t0 + Duration::from_secs(1), 0), 0.0);
    }

    #[test]
    fn test_counter_reset_reports_zero() {
        let smoother = NetworkSmoother::new();
        let t0 = Instant::now();
        smoother.observe(50_000, t0, 1_000);
        assert_eq!(smoother.observe(10, t0 + Duration::from_secs(1), 1_000), 0.0);
    }

    #[test]
    fn test_smoother_is_shared_state() {
        let smoother = NetworkSmoother::new();
        let t0 = Instant::now();
        assert_eq!(smoother.observe(0, t0, 8_000), 0.0);
        // A second channel's first reading still sees the previous sample.
        let value = smoother.observe(500, t0 + Duration::from_secs(1), 8_000);
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_defaults_missing_gpu() {
        let smoother = NetworkSmoother::new();
        let sample = ScriptedProbe { bytes: 0 }.sample();
        let snap = snapshot(&sample, &smoother, Instant::now());
        assert_eq!(snap.gpu, 0.0);
        assert_eq!(snap.network, 0.0);
        assert_eq!(snap.uptime_secs, 42);
    }

    #[tokio::test]
    async fn test_loop_pushes_until_send_fails() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        registry.admit(id, ChannelKind::Telemetry, tx).await;

        let handle = tokio::spawn({
            let registry = registry.clone();
            async move {
                run(
                    &registry,
                    id,
                    Box::new(ScriptedProbe { bytes: 0 }),
                    Arc::new(NetworkSmoother::new()),
                    Duration::from_millis(10),
                    stream::pending::<Frame>(),
                )
                .await
            }
        });

        for _ in 0..3 {
            let Some(Message::Text(text)) = rx.next().await else {
                panic!("expected a telemetry frame");
            };
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["CPU"], serde_json::json!(25.0));
            assert!((0.0..=100.0).contains(&value["Network"].as_f64().unwrap()));
        }
        drop(rx);

        handle.await.unwrap();
        assert!(!registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_loop_stops_on_close() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::unbounded::<Message>();
        registry.admit(id, ChannelKind::Telemetry, tx).await;

        run(
            &registry,
            id,
            Box::new(ScriptedProbe { bytes: 0 }),
            Arc::new(NetworkSmoother::new()),
            Duration::from_secs(3600),
            stream::iter(vec![Frame::Close]),
        )
        .await;
    }
}
