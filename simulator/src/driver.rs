//! Engine driver: forwards submissions to the scheduler, counts terminal
//! events and triggers global shutdown once every submitted job terminated.

use std::cell::RefCell;
use std::rc::Rc;

use dslab_core::{cast, log_debug, log_info, Event, EventHandler, Id, SimulationContext};

use crate::events::{JobFinished, JobSubmitted, SchedulerFinalize};
use crate::monitoring::Monitoring;
use crate::storage::JobStorage;

pub struct Driver {
    ctx: SimulationContext,
    jobs: Rc<RefCell<JobStorage>>,
    monitoring: Rc<RefCell<Monitoring>>,
    scheduler_id: Id,
    show_progress: bool,
    expected: usize,
    finished: usize,
}

impl Driver {
    pub fn new(
        ctx: SimulationContext,
        jobs: Rc<RefCell<JobStorage>>,
        monitoring: Rc<RefCell<Monitoring>>,
        scheduler_id: Id,
        show_progress: bool,
    ) -> Driver {
        Driver {
            ctx,
            jobs,
            monitoring,
            scheduler_id,
            show_progress,
            expected: 0,
            finished: 0,
        }
    }

    pub fn set_expected_jobs(&mut self, expected: usize) {
        self.expected = expected;
        if expected == 0 {
            self.finalize();
        }
    }

    fn finalize(&mut self) {
        log_info!(self.ctx, "all jobs terminated, finalizing");
        self.ctx.emit_now(SchedulerFinalize {}, self.scheduler_id);
        let mut monitoring = self.monitoring.borrow_mut();
        monitoring.write_job_statistics(self.jobs.borrow().iter());
        monitoring.flush();
    }
}

impl EventHandler for Driver {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            JobSubmitted { job_id } => {
                log_debug!(self.ctx, "registered submission of job {}", job_id);
                self.ctx.emit_now(JobSubmitted { job_id }, self.scheduler_id);
            }
            JobFinished { job_id, killed } => {
                self.finished += 1;
                if killed {
                    log_debug!(self.ctx, "registered kill of job {}", job_id);
                } else {
                    log_debug!(self.ctx, "registered completion of job {}", job_id);
                }
                if self.show_progress {
                    log_info!(
                        self.ctx,
                        "completed {}/{} jobs ({}%)",
                        self.finished,
                        self.expected,
                        self.finished * 100 / self.expected
                    );
                }
                if self.finished == self.expected {
                    self.finalize();
                }
            }
        })
    }
}
