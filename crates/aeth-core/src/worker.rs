//! VM-hosting nodes (§3, §4.9).

use crate::{AethError, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Active,
    Draining,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub hostname: String,
    pub advertise_addr: String,
    pub status: WorkerStatus,
    pub zone: String,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    pub cpu_cores: u32,
    pub used_cpu: u32,
    pub memory_mb: u32,
    pub used_memory_mb: u32,
    pub disk_gb: u32,
    pub used_disk_gb: u32,
    pub vm_count: u32,
    pub max_vms: u32,
    pub last_seen: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

/// A worker missing a heartbeat past this window is implicitly Offline
/// for placement purposes, regardless of its stored `status` (§3).
pub const HEARTBEAT_TIMEOUT_SECS: i64 = 60;

impl Worker {
    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_seen).num_seconds() < HEARTBEAT_TIMEOUT_SECS
    }

    pub fn is_placeable(&self, now: DateTime<Utc>) -> bool {
        self.status == WorkerStatus::Active && self.is_healthy(now)
    }

    pub fn free_cpu(&self) -> u32 {
        self.cpu_cores.saturating_sub(self.used_cpu)
    }

    pub fn free_memory_mb(&self) -> u32 {
        self.memory_mb.saturating_sub(self.used_memory_mb)
    }

    pub fn free_vm_slots(&self) -> u32 {
        self.max_vms.saturating_sub(self.vm_count)
    }

    pub fn reserve(&mut self, cpu: u32, memory_mb: u32) -> Result<(), AethError> {
        if self.used_cpu + cpu > self.cpu_cores
            || self.used_memory_mb + memory_mb > self.memory_mb
            || self.vm_count + 1 > self.max_vms
        {
            return Err(AethError::exhausted(format!(
                "worker {} has no free capacity for {cpu} vcpu / {memory_mb} MiB",
                self.id
            )));
        }
        self.used_cpu += cpu;
        self.used_memory_mb += memory_mb;
        self.vm_count += 1;
        Ok(())
    }

    pub fn release(&mut self, cpu: u32, memory_mb: u32) {
        self.used_cpu = self.used_cpu.saturating_sub(cpu);
        self.used_memory_mb = self.used_memory_mb.saturating_sub(memory_mb);
        self.vm_count = self.vm_count.saturating_sub(1);
    }

    pub fn heartbeat(&mut self) {
        self.last_seen = Utc::now();
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Worker {
        let now = Utc::now();
        Worker {
            id: WorkerId::new(),
            hostname: "node-1".into(),
            advertise_addr: "10.0.0.1:7000".into(),
            status: WorkerStatus::Active,
            zone: "us-east-1".into(),
            capabilities: HashSet::new(),
            cpu_cores: 8,
            used_cpu: 0,
            memory_mb: 16384,
            used_memory_mb: 0,
            disk_gb: 200,
            used_disk_gb: 0,
            vm_count: 0,
            max_vms: 10,
            last_seen: now,
            started_at: now,
        }
    }

    #[test]
    fn reserving_beyond_capacity_is_exhausted() {
        let mut w = worker();
        w.cpu_cores = 2;
        w.reserve(2, 512).unwrap();
        let err = w.reserve(1, 512).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Exhausted);
    }

    #[test]
    fn reserve_then_release_is_idempotent_on_counters() {
        let mut w = worker();
        w.reserve(2, 1024).unwrap();
        assert_eq!(w.used_cpu, 2);
        assert_eq!(w.vm_count, 1);
        w.release(2, 1024);
        assert_eq!(w.used_cpu, 0);
        assert_eq!(w.vm_count, 0);
    }

    #[test]
    fn worker_missing_heartbeat_past_sixty_seconds_is_unhealthy() {
        let mut w = worker();
        w.last_seen = Utc::now() - chrono::Duration::seconds(61);
        assert!(!w.is_healthy(Utc::now()));
        assert!(!w.is_placeable(Utc::now()));
    }

    #[test]
    fn draining_worker_is_never_placeable_even_if_healthy() {
        let mut w = worker();
        w.status = WorkerStatus::Draining;
        assert!(!w.is_placeable(Utc::now()));
    }
}
