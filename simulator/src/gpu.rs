//! GPU model: a processing speed, an allocation state and a per-GPU mutex so
//! overlapping kernels queue cleanly.

use std::cell::Cell;
use std::rc::Rc;

use dslab_core::SimulationContext;

use crate::sync::{Mutex, SyncContext};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuState {
    Free,
    Allocated,
}

impl GpuState {
    pub fn code(&self) -> u32 {
        match self {
            GpuState::Free => 0,
            GpuState::Allocated => 1,
        }
    }
}

pub struct Gpu {
    pub id: u32,
    processing_speed: f64,
    state: Cell<GpuState>,
    utilization: Cell<f64>,
    mutex: Rc<Mutex>,
}

impl Gpu {
    pub fn new(id: u32, processing_speed: f64, sync: Rc<SyncContext>) -> Rc<Gpu> {
        Rc::new(Gpu {
            id,
            processing_speed,
            state: Cell::new(GpuState::Free),
            utilization: Cell::new(0.0),
            mutex: Mutex::new(sync),
        })
    }

    pub fn state(&self) -> GpuState {
        self.state.get()
    }

    pub fn utilization(&self) -> f64 {
        self.utilization.get()
    }

    /// One kernel: queue on the GPU, hold it for `flops / speed` virtual
    /// seconds, release.
    pub async fn exec(&self, ctx: &SimulationContext, flops: f64) {
        self.mutex.acquire().await;
        self.state.set(GpuState::Allocated);
        self.utilization.set(1.0);
        ctx.sleep(flops / self.processing_speed).await;
        self.utilization.set(0.0);
        self.state.set(GpuState::Free);
        self.mutex.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dslab_core::Simulation;

    #[test]
    fn kernels_queue_on_the_gpu_mutex() {
        let mut sim = Simulation::new(123);
        let sync = SyncContext::new(sim.create_context("sync"));
        let gpu = Gpu::new(0, 1e9, sync);
        let ctx = sim.create_context("node");

        {
            let gpu = gpu.clone();
            let ctx = ctx.clone();
            sim.spawn(async move {
                futures::join!(gpu.exec(&ctx, 2e9), gpu.exec(&ctx, 3e9));
                assert_eq!(gpu.state(), GpuState::Free);
            });
        }

        sim.step_until_no_events();
        // kernels serialise: 2s + 3s
        assert_eq!(sim.time(), 5.0);
    }
}
