//! Resource pressure probing and admission control
//!
//! Hosts report memory pressure as a ratio in `[0, 1]`. Writers consult a
//! [`PressureGate`] before mutating bounded state and silently drop the write
//! when pressure is above their threshold. A host that cannot measure
//! pressure reports `None`, which always admits.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Source of resource pressure readings
pub trait ResourcePressureProbe: Send + Sync {
    /// Current pressure in `[0, 1]`, or `None` when metrics are unavailable
    fn pressure(&self) -> Option<f64>;
}

/// Probe for hosts without metrics
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPressure;

impl ResourcePressureProbe for NoPressure {
    fn pressure(&self) -> Option<f64> {
        None
    }
}

/// Probe whose reading is pushed by the host
#[derive(Debug, Default)]
pub struct ManualProbe {
    bits: AtomicU64,
    known: std::sync::atomic::AtomicBool,
}

impl ManualProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a known reading
    pub fn with_pressure(value: f64) -> Self {
        let probe = Self::new();
        probe.set(value);
        probe
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.known.store(true, Ordering::Relaxed);
    }

    /// Forget the reading, reverting to "no metrics"
    pub fn reset(&self) {
        self.known.store(false, Ordering::Relaxed);
    }
}

impl ResourcePressureProbe for ManualProbe {
    fn pressure(&self) -> Option<f64> {
        if self.known.load(Ordering::Relaxed) {
            Some(f64::from_bits(self.bits.load(Ordering::Relaxed)))
        } else {
            None
        }
    }
}

/// Memory pressure from `/proc/meminfo` (`1 - MemAvailable / MemTotal`)
#[derive(Debug, Clone)]
pub struct MeminfoProbe {
    path: PathBuf,
}

impl MeminfoProbe {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("/proc/meminfo"),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Default for MeminfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourcePressureProbe for MeminfoProbe {
    fn pressure(&self) -> Option<f64> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        parse_meminfo(&content)
    }
}

/// Compute the used-memory ratio from meminfo text
pub fn parse_meminfo(content: &str) -> Option<f64> {
    let mut total: Option<f64> = None;
    let mut available: Option<f64> = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        match name {
            "MemTotal:" => total = value.parse().ok(),
            "MemAvailable:" => available = value.parse().ok(),
            _ => {}
        }
    }

    let total = total.filter(|t| *t > 0.0)?;
    let available = available?;
    Some((1.0 - available / total).clamp(0.0, 1.0))
}

/// Admission control for one subsystem
#[derive(Clone)]
pub struct PressureGate {
    probe: Arc<dyn ResourcePressureProbe>,
    threshold: f64,
}

impl PressureGate {
    pub fn new(probe: Arc<dyn ResourcePressureProbe>, threshold: f64) -> Self {
        Self { probe, threshold }
    }

    /// Gate that never rejects
    pub fn open() -> Self {
        Self::new(Arc::new(NoPressure), 1.0)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether a write may proceed right now
    pub fn admits(&self) -> bool {
        match self.probe.pressure() {
            Some(pressure) if pressure > self.threshold => {
                debug!(
                    "Pressure {:.2} above threshold {:.2}, dropping write",
                    pressure, self.threshold
                );
                false
            }
            _ => true,
        }
    }
}

impl std::fmt::Debug for PressureGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PressureGate")
            .field("threshold", &self.threshold)
            .field("pressure", &self.probe.pressure())
            .finish()
    }
}
