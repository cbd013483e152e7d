//! VM placement (§4.9): prefer Active, healthy workers in the requested
//! zone, then fit-first by free VM slots, free CPU, and free memory. The
//! spec leaves the algorithm implementer's choice beyond that preference
//! order, so ties are broken by most free capacity first — spreads load
//! instead of packing the first worker that merely fits.

use aeth_core::worker::Worker;
use aeth_core::{AethError, WorkerId};
use chrono::{DateTime, Utc};

pub struct PlacementRequest {
    pub zone: Option<String>,
    pub vcpu_count: u32,
    pub memory_mb: u32,
}

/// Picks a worker for a new VM, or `Exhausted` if nothing placeable fits.
pub fn select_worker(workers: &[Worker], request: &PlacementRequest, now: DateTime<Utc>) -> Result<WorkerId, AethError> {
    let fits = |w: &&Worker| {
        w.is_placeable(now)
            && w.free_vm_slots() > 0
            && w.free_cpu() >= request.vcpu_count
            && w.free_memory_mb() >= request.memory_mb
    };

    let mut zone_matched: Vec<&Worker> = workers
        .iter()
        .filter(fits)
        .filter(|w| request.zone.as_deref().is_none_or(|z| w.zone == z))
        .collect();
    zone_matched.sort_by(|a, b| b.free_cpu().cmp(&a.free_cpu()));
    if let Some(w) = zone_matched.first() {
        return Ok(w.id);
    }

    let mut any_zone: Vec<&Worker> = workers.iter().filter(fits).collect();
    any_zone.sort_by(|a, b| b.free_cpu().cmp(&a.free_cpu()));
    any_zone
        .first()
        .map(|w| w.id)
        .ok_or_else(|| AethError::exhausted("no worker has capacity for this VM"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeth_core::worker::WorkerStatus;
    use std::collections::HashSet;

    fn worker(zone: &str, free_cpu: u32, free_vms: u32) -> Worker {
        let now = Utc::now();
        Worker {
            id: WorkerId::new(),
            hostname: "node".into(),
            advertise_addr: "10.0.0.1:7000".into(),
            status: WorkerStatus::Active,
            zone: zone.into(),
            capabilities: HashSet::new(),
            cpu_cores: free_cpu,
            used_cpu: 0,
            memory_mb: 16384,
            used_memory_mb: 0,
            disk_gb: 200,
            used_disk_gb: 0,
            vm_count: 0,
            max_vms: free_vms,
            last_seen: now,
            started_at: now,
        }
    }

    fn request(zone: Option<&str>) -> PlacementRequest {
        PlacementRequest {
            zone: zone.map(String::from),
            vcpu_count: 1,
            memory_mb: 256,
        }
    }

    #[test]
    fn prefers_a_worker_in_the_requested_zone_over_more_capacity_elsewhere() {
        let in_zone = worker("us-east-1", 2, 4);
        let other_zone = worker("us-west-2", 16, 16);
        let in_zone_id = in_zone.id;
        let workers = vec![in_zone, other_zone];

        let chosen = select_worker(&workers, &request(Some("us-east-1")), Utc::now()).unwrap();
        assert_eq!(chosen, in_zone_id);
    }

    #[test]
    fn falls_back_to_any_zone_when_the_requested_zone_has_no_capacity() {
        let other_zone = worker("us-west-2", 16, 16);
        let other_id = other_zone.id;
        let workers = vec![other_zone];

        let chosen = select_worker(&workers, &request(Some("us-east-1")), Utc::now()).unwrap();
        assert_eq!(chosen, other_id);
    }

    #[test]
    fn draining_workers_are_never_selected() {
        let mut w = worker("us-east-1", 8, 8);
        w.status = WorkerStatus::Draining;
        let workers = vec![w];
        let err = select_worker(&workers, &request(None), Utc::now()).unwrap_err();
        assert_eq!(err.kind, aeth_core::ErrorKind::Exhausted);
    }

    #[test]
    fn a_worker_at_its_vm_cap_is_skipped_even_with_free_cpu() {
        let mut w = worker("us-east-1", 8, 1);
        w.vm_count = 1;
        let workers = vec![w];
        let err = select_worker(&workers, &request(None), Utc::now()).unwrap_err();
        assert_eq!(err.kind, aeth_core::ErrorKind::Exhausted);
    }
}
