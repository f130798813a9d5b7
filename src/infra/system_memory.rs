use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::warn;

use crate::cache::{MemoryProbe, MemorySample, mutex_lock};

/// Reads this process's resident memory and the host's total memory.
pub struct SystemMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(reason) => {
                warn!(
                    target = "kirie::infra::system_memory",
                    reason, "Current process id unavailable; memory pressure checks disabled"
                );
                None
            }
        };
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn sample(&self) -> Option<MemorySample> {
        let pid = self.pid?;
        let mut system = mutex_lock(&self.system, "infra::system_memory", "sample");
        system.refresh_memory();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        let total_bytes = system.total_memory();
        let process_bytes = system.process(pid)?.memory();
        (total_bytes > 0).then_some(MemorySample {
            process_bytes,
            total_bytes,
        })
    }
}
