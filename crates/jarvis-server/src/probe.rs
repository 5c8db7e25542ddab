//! Host metrics source for the telemetry channel.

use std::path::Path;
use std::sync::Arc;

use sysinfo::{Networks, System};
use tracing::trace;

/// Raw readings from one sampling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub uptime_secs: u64,
    /// Cumulative bytes sent plus received over all interfaces.
    pub net_bytes: u64,
    /// Summed capacity of the links that are up, in bits per second.
    pub link_capacity_bps: u64,
    /// `None` when no GPU is exposed to the process.
    pub gpu_percent: Option<f32>,
}

pub trait HostProbe: Send {
    fn sample(&mut self) -> HostSample;
}

/// Builds a fresh probe for each telemetry channel.
pub type ProbeFactory = Arc<dyn Fn() -> Box<dyn HostProbe> + Send + Sync>;

pub fn sysinfo_factory() -> ProbeFactory {
    Arc::new(|| Box::new(SysinfoProbe::new()) as Box<dyn HostProbe>)
}

pub struct SysinfoProbe {
    system: System,
    networks: Networks,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta; prime it so the first sample is meaningful.
        system.refresh_cpu();
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe for SysinfoProbe {
    fn sample(&mut self) -> HostSample {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.networks.refresh();

        let total_memory = self.system.total_memory();
        let memory_percent = if total_memory == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total_memory as f64 * 100.0) as f32
        };

        let net_bytes = self
            .networks
            .iter()
            .map(|(_, data)| data.total_received().saturating_add(data.total_transmitted()))
            .fold(0u64, u64::saturating_add);

        let sample = HostSample {
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            memory_percent,
            uptime_secs: System::uptime(),
            net_bytes,
            link_capacity_bps: link_capacity_bps(Path::new("/sys/class/net")),
            gpu_percent: None,
        };
        trace!(?sample, "Host sampled");
        sample
    }
}

/// Sum the advertised speed of every interface that is up.
pub fn link_capacity_bps(net_dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(net_dir) else {
        return 0;
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let dir = entry.path();
            let operstate = std::fs::read_to_string(dir.join("operstate")).ok()?;
            let speed = std::fs::read_to_string(dir.join("speed")).ok()?;
            parse_link(&operstate, &speed)
        })
        .fold(0u64, u64::saturating_add)
}

/// Capacity of one interface in bits per second. Interfaces that are down
/// or report an unknown speed (`-1`) contribute nothing.
pub fn parse_link(operstate: &str, speed_mbps: &str) -> Option<u64> {
    if operstate.trim() != "up" {
        return None;
    }
    let mbps: i64 = speed_mbps.trim().parse().ok()?;
    u64::try_from(mbps)
        .ok()
        .filter(|m| *m > 0)
        .map(|m| m.saturating_mul(1_000_000))
}
