//! Process memory sampling via `/proc/self/statm` (Linux only). Returns
//! `None` on any other platform or parse failure so callers exclude memory
//! from the unhealthy/degraded checks rather than fail outright.

#[cfg(target_os = "linux")]
const PAGE_SIZE: u64 = 4096;

/// (bytes used, bytes total).
pub fn sample() -> Option<(u64, u64)> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        let used = resident_pages * PAGE_SIZE;

        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let total_kb: u64 = meminfo
            .lines()
            .find(|l| l.starts_with("MemTotal:"))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()?;
        Some((used, total_kb * 1024))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
