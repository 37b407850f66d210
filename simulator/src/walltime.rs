//! Walltime monitors.
//!
//! One delayed self-event per running job, armed at the job's first takeover
//! and cancelled through its event id when the job terminates normally.
//! A walltime of 0 means unbounded and never arms.

use rustc_hash::{FxHashMap, FxHashSet};

use dslab_core::event::EventId;
use dslab_core::SimulationContext;

use crate::events::WalltimeExceeded;
use crate::job::JobId;

pub struct WalltimeMonitor {
    ctx: SimulationContext,
    armed: FxHashMap<JobId, EventId>,
    ever_armed: FxHashSet<JobId>,
}

impl WalltimeMonitor {
    pub fn new(ctx: SimulationContext) -> WalltimeMonitor {
        WalltimeMonitor {
            ctx,
            armed: FxHashMap::default(),
            ever_armed: FxHashSet::default(),
        }
    }

    /// Arms the monitor at the job's first RUNNING transition; later
    /// takeovers (reconfigurations, continues) never re-arm.
    pub fn arm(&mut self, job_id: JobId, walltime: f64, grace_period: f64) {
        if walltime <= 0.0 || !self.ever_armed.insert(job_id) {
            return;
        }
        let event_id = self
            .ctx
            .emit_self(WalltimeExceeded { job_id }, walltime + grace_period);
        self.armed.insert(job_id, event_id);
    }

    pub fn cancel(&mut self, job_id: JobId) {
        if let Some(event_id) = self.armed.remove(&job_id) {
            self.ctx.cancel_event(event_id);
        }
    }

    /// Forgets the pending event after it fired.
    pub fn fired(&mut self, job_id: JobId) {
        self.armed.remove(&job_id);
    }
}
