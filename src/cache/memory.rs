/// A point-in-time reading of process and system memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub process_bytes: u64,
    pub total_bytes: u64,
}

impl MemorySample {
    pub fn usage_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.process_bytes as f64 / self.total_bytes as f64
    }

    pub fn exceeds(&self, threshold: f64) -> bool {
        self.usage_fraction() > threshold
    }
}

/// Source of memory readings for the pressure eviction policy.
///
/// Returning `None` means no reading is available; the policy then leaves
/// the cache alone.
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> Option<MemorySample>;
}

/// Probe that never reports pressure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPressure;

impl MemoryProbe for NoPressure {
    fn sample(&self) -> Option<MemorySample> {
        None
    }
}
