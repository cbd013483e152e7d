//! Cluster-stats aggregation (§4.9): totals across all workers plus
//! per-zone counts.

use aeth_core::worker::Worker;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ZoneStats {
    pub worker_count: u32,
    pub healthy_count: u32,
    pub vm_count: u32,
    pub free_vm_slots: u32,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ClusterStats {
    pub total_workers: u32,
    pub healthy_workers: u32,
    pub total_vms: u32,
    pub total_cpu_cores: u32,
    pub used_cpu: u32,
    pub total_memory_mb: u32,
    pub used_memory_mb: u32,
    pub per_zone: HashMap<String, ZoneStats>,
}

pub fn aggregate(workers: &[Worker], now: DateTime<Utc>) -> ClusterStats {
    let mut stats = ClusterStats::default();
    for w in workers {
        stats.total_workers += 1;
        stats.total_vms += w.vm_count;
        stats.total_cpu_cores += w.cpu_cores;
        stats.used_cpu += w.used_cpu;
        stats.total_memory_mb += w.memory_mb;
        stats.used_memory_mb += w.used_memory_mb;
        let healthy = w.is_healthy(now);
        if healthy {
            stats.healthy_workers += 1;
        }

        let zone = stats.per_zone.entry(w.zone.clone()).or_default();
        zone.worker_count += 1;
        zone.vm_count += w.vm_count;
        zone.free_vm_slots += w.free_vm_slots();
        if healthy {
            zone.healthy_count += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeth_core::worker::WorkerStatus;
    use aeth_core::WorkerId;
    use std::collections::HashSet;

    fn worker(zone: &str, healthy: bool) -> Worker {
        let now = Utc::now();
        let last_seen = if healthy { now } else { now - chrono::Duration::seconds(120) };
        Worker {
            id: WorkerId::new(),
            hostname: "node".into(),
            advertise_addr: "10.0.0.1:7000".into(),
            status: WorkerStatus::Active,
            zone: zone.into(),
            capabilities: HashSet::new(),
            cpu_cores: 4,
            used_cpu: 1,
            memory_mb: 8192,
            used_memory_mb: 1024,
            disk_gb: 100,
            used_disk_gb: 0,
            vm_count: 1,
            max_vms: 8,
            last_seen,
            started_at: now,
        }
    }

    #[test]
    fn aggregates_totals_and_per_zone_counts() {
        let workers = vec![worker("us-east-1", true), worker("us-east-1", false), worker("us-west-2", true)];
        let stats = aggregate(&workers, Utc::now());

        assert_eq!(stats.total_workers, 3);
        assert_eq!(stats.healthy_workers, 2);
        assert_eq!(stats.total_vms, 3);
        assert_eq!(stats.per_zone["us-east-1"].worker_count, 2);
        assert_eq!(stats.per_zone["us-east-1"].healthy_count, 1);
        assert_eq!(stats.per_zone["us-west-2"].worker_count, 1);
    }
}
