//! Names of the fixed metric catalog.

/// Synthetic counter incremented once per poll.
pub const POLL_COUNT: &str = "PollCount";

/// Synthetic gauge holding a uniform random number in `[0, 1)`.
pub const RANDOM_VALUE: &str = "RandomValue";

/// Gauges derived from [`crate::alloc::TrackingAllocator`].
pub const ALLOCATOR_GAUGES: [&str; 14] = [
    "Alloc",
    "HeapAlloc",
    "PeakAlloc",
    "TotalAlloc",
    "TotalFreed",
    "Mallocs",
    "Frees",
    "Reallocs",
    "ZeroedAllocs",
    "HeapObjects",
    "LargestAlloc",
    "SmallAllocs",
    "MediumAllocs",
    "LargeAllocs",
];

/// Gauges describing the agent process as seen by the operating system.
pub const PROCESS_GAUGES: [&str; 11] = [
    "Sys",
    "VirtualMemory",
    "ProcessCPU",
    "DiskReadBytes",
    "DiskWrittenBytes",
    "TotalDiskReadBytes",
    "TotalDiskWrittenBytes",
    "Uptime",
    "StartTime",
    "Threads",
    "NumCPU",
];

/// Optional host-wide gauges. Per-core utilization is reported as
/// `CPUutilization{index}` in addition to these.
pub const HOST_GAUGES: [&str; 2] = ["TotalMemory", "FreeMemory"];

pub const CPU_UTILIZATION_PREFIX: &str = "CPUutilization";

/// Size of the baseline catalog: runtime gauges, [`RANDOM_VALUE`] and
/// [`POLL_COUNT`].
pub const BASELINE_LEN: usize = ALLOCATOR_GAUGES.len() + PROCESS_GAUGES.len() + 2;
