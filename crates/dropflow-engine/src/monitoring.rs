//! Read-only runtime counters for pipes and workers, plus the pipeline's 2-D monitoring
//! matrix (§4.4, §6).

use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::validator::Layout;
use crate::worker::WorkerState;
use std::sync::Arc;

/// Point-in-time snapshot of one pipe's counters (§6).
#[derive(Debug, Clone)]
pub struct PipeSnapshot {
    pub id: PipeId,
    pub name: String,
    pub base_capacity: usize,
    pub in_order_drops: usize,
    pub out_of_order_drops: usize,
    pub in_push_drops: usize,
    pub total_pushed: u64,
    pub average_load: f64,
}

impl PipeSnapshot {
    #[must_use]
    pub fn capture(pipe: &dyn PipeLike) -> Self {
        Self {
            id: pipe.pipe_id(),
            name: pipe.name().to_owned(),
            base_capacity: pipe.base_capacity(),
            in_order_drops: pipe.in_order_drops(),
            out_of_order_drops: pipe.out_of_order_drops(),
            in_push_drops: pipe.in_push_drops(),
            total_pushed: pipe.total_pushed(),
            average_load: pipe.average_load(),
        }
    }
}

/// Point-in-time snapshot of one worker's counters (§6).
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub name: String,
    pub kind: NodeKind,
    pub state: WorkerState,
    pub concurrency: usize,
    pub utilization: f64,
    pub canceled_work: usize,
    pub input_average_load: Option<f64>,
}

/// Threshold above which an input-having worker is reported as a bottleneck (§4.4).
pub const BOTTLENECK_THRESHOLD: f64 = 0.95;

/// The pipeline's 2-D monitoring chart: workers grouped into depth columns (§4.5 step 3),
/// paired with a lookup from worker id to its column/row for display code.
#[derive(Debug, Clone, Default)]
pub struct MonitoringMatrix {
    pub layout: Layout,
}

impl MonitoringMatrix {
    #[must_use]
    pub fn from_layout(layout: Layout) -> Self {
        Self { layout }
    }

    /// The `(column, row)` position of `worker`, if it was reachable from the root.
    #[must_use]
    pub fn position_of(&self, worker: WorkerId) -> Option<(usize, usize)> {
        for (col, workers) in self.layout.columns.iter().enumerate() {
            if let Some(row) = workers.iter().position(|&id| id == worker) {
                return Some((col, row));
            }
        }
        None
    }
}

/// Wraps an `Arc`-held pipe so monitoring code can snapshot it without caring about its
/// payload type.
#[derive(Clone)]
pub struct MonitoredPipe(pub Arc<dyn PipeLike>);

impl MonitoredPipe {
    #[must_use]
    pub fn snapshot(&self) -> PipeSnapshot {
        PipeSnapshot::capture(self.0.as_ref())
    }
}
