/// Translation of abstract resource quantities into cgroup control values
use crate::types::Resources;
use serde::Serialize;

/// cgroup shares granted per whole CPU
pub const CPU_SHARES_PER_CPU: u64 = 1024;
/// Floor for `cpu.shares`; a container never gets zero weight
pub const MIN_CPU_SHARES: u64 = 10;
/// Floor for the memory limit, in MB, below which the container runtime cannot bootstrap
pub const MIN_RSS_MB: u64 = 128;

const MEGABYTE: u64 = 1024 * 1024;

pub const CPU_SHARES_PROPERTY: &str = "cpu.shares";
pub const MEMORY_LIMIT_PROPERTY: &str = "memory.limit_in_bytes";

/// CPU shares for a fractional CPU count.
///
/// The product `1024 * cpus` is truncated toward zero, so half a CPU yields
/// 512 shares. Negative and NaN counts fall to the floor.
pub fn cpu_shares_for(cpus: f64) -> u64 {
    let shares = (CPU_SHARES_PER_CPU as f64 * cpus) as u64;
    shares.max(MIN_CPU_SHARES)
}

/// Memory ceiling in bytes for a size in MB (fractional MB are truncated)
pub fn memory_limit_bytes_for(mem_mb: f64) -> u64 {
    (mem_mb as u64).max(MIN_RSS_MB) * MEGABYTE
}

/// Control values derived from one executor's resource assignment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CgroupLimits {
    pub cpu_shares: u64,
    pub memory_limit_bytes: u64,
}

impl CgroupLimits {
    /// Missing `cpu` or `mem` scalars count as zero and hit the floors
    pub fn for_resources(resources: &Resources) -> Self {
        Self::new(
            resources.scalar("cpu").unwrap_or(0.0),
            resources.scalar("mem").unwrap_or(0.0),
        )
    }

    pub fn new(cpus: f64, mem_mb: f64) -> Self {
        Self {
            cpu_shares: cpu_shares_for(cpus),
            memory_limit_bytes: memory_limit_bytes_for(mem_mb),
        }
    }

    /// Property/value pairs in the order they are applied
    pub fn properties(&self) -> [(&'static str, u64); 2] {
        [
            (CPU_SHARES_PROPERTY, self.cpu_shares),
            (MEMORY_LIMIT_PROPERTY, self.memory_limit_bytes),
        ]
    }
}
