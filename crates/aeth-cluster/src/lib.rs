//! Worker registry & scheduler (C9, §4.9): Worker CRUD plus drain/activate,
//! fit-first placement, and cluster-wide stats aggregation.

pub mod registry;
pub mod scheduler;
pub mod stats;

pub use registry::{node_infos, node_stats, WorkerRegistry};
pub use scheduler::{select_worker, PlacementRequest};
pub use stats::{aggregate, ClusterStats};
