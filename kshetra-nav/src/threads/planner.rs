//! On-demand coverage planning thread.
//!
//! Plans one zone at a time under a wall-clock budget. The emergency flag
//! doubles as the cancel token, so an e-stop abandons a running plan at the
//! next budget check. A result leaves the thread only when planning has
//! finished, successfully or not.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::algorithms::coverage::{CoveragePlanner, PlanBudget};
use crate::error::{NavError, Result};
use crate::navigation::{PlanOutcome, PlanRequest};
use crate::state::SharedState;

/// Planner thread handle.
pub struct PlannerWorker {
    handle: JoinHandle<()>,
}

impl PlannerWorker {
    pub fn spawn(
        planner: CoveragePlanner,
        budget: Duration,
        shared: Arc<SharedState>,
        requests: Receiver<PlanRequest>,
        outcomes: Sender<PlanOutcome>,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("planner".into())
            .spawn(move || run_planner(planner, budget, shared, requests, outcomes))
            .map_err(|e| NavError::Io(std::io::Error::other(format!("spawn planner thread: {}", e))))?;
        Ok(Self { handle })
    }

    /// Wait for thread to finish.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

/// Plan a single request. Shared with the synchronous CLI path.
pub fn plan_request(
    planner: &CoveragePlanner,
    request: &PlanRequest,
    budget: Duration,
    shared: &SharedState,
) -> PlanOutcome {
    let budget = PlanBudget::with_timeout(budget).with_cancel(shared.emergency_flag());
    let result = planner.plan_with_budget(&request.zone, &request.obstacles, request.zone.pattern, &budget);
    match &result {
        Ok(path) => log::info!(
            "Planned zone {} ({} waypoints, {:.1}m mowing)",
            request.zone.id,
            path.len(),
            path.mowing_length()
        ),
        Err(e) => log::warn!("Planning zone {} failed: {}", request.zone.id, e),
    }
    PlanOutcome {
        request_id: request.request_id,
        zone_id: request.zone.id,
        result,
    }
}

fn run_planner(
    planner: CoveragePlanner,
    budget: Duration,
    shared: Arc<SharedState>,
    requests: Receiver<PlanRequest>,
    outcomes: Sender<PlanOutcome>,
) {
    log::info!("Planner thread started (budget {}ms)", budget.as_millis());

    while shared.is_running() {
        crossbeam_channel::select! {
            recv(requests) -> msg => {
                let Ok(request) = msg else {
                    log::info!("Plan request channel closed");
                    break;
                };
                let outcome = plan_request(&planner, &request, budget, &shared);
                if outcomes.send(outcome).is_err() {
                    log::info!("Control loop gone, planner exiting");
                    break;
                }
            }
            default(Duration::from_millis(50)) => {}
        }
    }

    log::info!("Planner thread shutting down");
}
