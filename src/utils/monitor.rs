#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use std::time::{Duration, Instant};
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessesToUpdate, System};

#[cfg(feature = "cli")]
#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub stage: String,
    pub cpu_usage: f32,
    pub memory_usage_mb: u64,
    pub peak_memory_mb: u64,
    pub elapsed_time: Duration,
}

/// 各階段的 CPU / 記憶體快照
#[cfg(feature = "cli")]
pub struct StageMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    start_time: Instant,
    peak_memory: Mutex<u64>,
    enabled: bool,
}

#[cfg(feature = "cli")]
impl StageMonitor {
    pub fn new(enabled: bool) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("⚠️ Resource monitor disabled: {}", e);
                None
            }
        };
        let mut system = System::new();
        if let (true, Some(pid)) = (enabled, pid) {
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        }

        Self {
            system: Mutex::new(system),
            pid,
            start_time: Instant::now(),
            peak_memory: Mutex::new(0),
            enabled: enabled && pid.is_some(),
        }
    }

    pub fn snapshot(&self, stage: &str) -> Option<StageSnapshot> {
        if !self.enabled {
            return None;
        }
        let pid = self.pid?;

        let mut system = self.system.lock().ok()?;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = system.process(pid)?;
        let memory_mb = process.memory() / 1024 / 1024;

        let mut peak = self.peak_memory.lock().ok()?;
        *peak = (*peak).max(memory_mb);

        Some(StageSnapshot {
            stage: stage.to_string(),
            cpu_usage: process.cpu_usage(),
            memory_usage_mb: memory_mb,
            peak_memory_mb: *peak,
            elapsed_time: self.start_time.elapsed(),
        })
    }

    pub fn log_stage(&self, stage: &str) {
        if let Some(snapshot) = self.snapshot(stage) {
            tracing::info!(
                "📊 {} - CPU: {:.1}%, Memory: {}MB, Peak: {}MB, Time: {:?}",
                snapshot.stage,
                snapshot.cpu_usage,
                snapshot.memory_usage_mb,
                snapshot.peak_memory_mb,
                snapshot.elapsed_time
            );
        }
    }

    pub fn log_final(&self) {
        if let Some(snapshot) = self.snapshot("final") {
            tracing::info!(
                "📊 Final Stats - Total Time: {:?}, Peak Memory: {}MB",
                snapshot.elapsed_time,
                snapshot.peak_memory_mb
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(feature = "cli")]
impl Default for StageMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

// 非 CLI 建置時的空實作
#[cfg(not(feature = "cli"))]
#[derive(Default)]
pub struct StageMonitor;

#[cfg(not(feature = "cli"))]
impl StageMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn log_stage(&self, _stage: &str) {}

    pub fn log_final(&self) {}

    pub fn is_enabled(&self) -> bool {
        false
    }
}
