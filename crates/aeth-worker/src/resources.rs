//! Per-worker resource accounting (§4.6): reserve on successful VM
//! creation, release on deletion. The capacity check and the mutation are a
//! single atomic repo call (`reserve_capacity`/`release_capacity`) — never
//! a separate get-then-update — so two handlers racing to reserve capacity
//! on the same worker can't both pass the check and overrun `cpu_cores`.
//! This wraps those repo calls behind the same reserve/release vocabulary
//! `Worker` itself uses so handlers don't duplicate the capacity arithmetic.

use aeth_core::repo::WorkerRepo;
use aeth_core::{AethError, WorkerId};
use std::sync::Arc;

pub struct ResourceAccountant {
    worker_repo: Arc<dyn WorkerRepo>,
    worker_id: WorkerId,
}

impl ResourceAccountant {
    pub fn new(worker_repo: Arc<dyn WorkerRepo>, worker_id: WorkerId) -> Self {
        Self { worker_repo, worker_id }
    }

    pub async fn reserve(&self, vcpu_count: u32, memory_mb: u32) -> Result<(), AethError> {
        self.worker_repo.reserve_capacity(self.worker_id, vcpu_count, memory_mb).await
    }

    pub async fn release(&self, vcpu_count: u32, memory_mb: u32) -> Result<(), AethError> {
        self.worker_repo.release_capacity(self.worker_id, vcpu_count, memory_mb).await
    }
}
