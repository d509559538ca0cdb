//! Process table backed by sysinfo

use anyhow::{anyhow, Result};
use lab_agent_shared::ProcessInfo;
use std::cmp::Ordering;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::{Pid, Signal, System};
use tracing::{debug, warn};

/// Poll step while waiting for a terminated process to exit
const EXIT_POLL: Duration = Duration::from_millis(200);

/// Shared view of the running processes
pub struct ProcessTable {
    sys: Mutex<System>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }

    /// Top `limit` processes by CPU share
    ///
    /// CPU usage needs two samples, so this waits one sysinfo update interval.
    pub async fn top_by_cpu(&self, limit: usize) -> Vec<ProcessInfo> {
        self.refresh();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.refresh();

        let Ok(sys) = self.sys.lock() else {
            return Vec::new();
        };
        let total_memory = sys.total_memory().max(1) as f64;
        let mut rows: Vec<ProcessInfo> = sys
            .processes()
            .iter()
            .map(|(pid, p)| ProcessInfo {
                pid: pid.as_u32(),
                name: p.name().to_string(),
                cpu_percent: p.cpu_usage(),
                memory_percent: ((p.memory() as f64 / total_memory) * 100.0) as f32,
                create_time: p.start_time(),
            })
            .collect();
        rank_by_cpu(&mut rows, limit);
        rows
    }

    /// Terminate gracefully, wait up to `grace`, then force-kill
    pub async fn terminate(&self, pid: u32, grace: Duration) -> Result<()> {
        let target = Pid::from_u32(pid);
        {
            let mut sys = self.lock()?;
            sys.refresh_processes();
            let process = sys
                .process(target)
                .ok_or_else(|| anyhow!("Process {pid} not found"))?;
            match process.kill_with(Signal::Term) {
                Some(true) => debug!("[CMD] Sent terminate to {}", pid),
                Some(false) => warn!("[CMD] Terminate signal to {} was refused", pid),
                // No polite signal on this platform
                None => {
                    process.kill();
                }
            }
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            tokio::time::sleep(EXIT_POLL).await;
            if !self.lock()?.refresh_process(target) {
                return Ok(());
            }
        }

        let mut sys = self.lock()?;
        if !sys.refresh_process(target) {
            return Ok(());
        }
        match sys.process(target) {
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(anyhow!("Failed to kill process {pid}")),
            None => Ok(()),
        }
    }

    fn refresh(&self) {
        if let Ok(mut sys) = self.sys.lock() {
            sys.refresh_processes();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, System>> {
        self.sys
            .lock()
            .map_err(|_| anyhow!("process table lock poisoned"))
    }
}

/// Sort descending by CPU share (NaN last) and keep `limit` rows
fn rank_by_cpu(rows: &mut Vec<ProcessInfo>, limit: usize) {
    rows.sort_by(|a, b| {
        b.cpu_percent
            .partial_cmp(&a.cpu_percent)
            .unwrap_or(Ordering::Equal)
    });
    rows.truncate(limit);
}
