//! Point-in-time read models over the Worker registry, distinct from the
//! mutable `Worker` row `aeth-storage` persists (§5.9 ambient expansion).

use crate::worker::{Worker, WorkerStatus};
use crate::WorkerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: WorkerId,
    pub hostname: String,
    pub zone: String,
    pub status: WorkerStatus,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    pub id: WorkerId,
    pub free_cpu: u32,
    pub free_memory_mb: u32,
    pub free_vm_slots: u32,
    pub uptime_secs: i64,
}

impl NodeInfo {
    pub fn from_worker(w: &Worker, now: DateTime<Utc>) -> Self {
        Self {
            id: w.id,
            hostname: w.hostname.clone(),
            zone: w.zone.clone(),
            status: w.status,
            healthy: w.is_healthy(now),
        }
    }
}

impl NodeStats {
    pub fn from_worker(w: &Worker, now: DateTime<Utc>) -> Self {
        Self {
            id: w.id,
            free_cpu: w.free_cpu(),
            free_memory_mb: w.free_memory_mb(),
            free_vm_slots: w.free_vm_slots(),
            uptime_secs: w.uptime(now).num_seconds(),
        }
    }
}
