//! Process memory snapshots
//!
//! Resident-set readings recorded at run start and after each stage so a
//! finished run can report starting and peak usage.

use sysinfo::{Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MemorySnapshot {
    pub resident_bytes: u64,
}

impl MemorySnapshot {
    pub fn resident_mb(&self) -> f64 {
        self.resident_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Current resident memory of this process, zero when the platform
/// refuses the reading
pub fn current() -> MemorySnapshot {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    MemorySnapshot {
        resident_bytes: system.process(pid).map(|p| p.memory()).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_this_process() {
        let snapshot = current();
        assert!(snapshot.resident_bytes > 0);
        assert!(snapshot.resident_mb() > 0.0);
    }
}
