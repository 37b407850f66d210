//! Virtual-time synchronisation primitives.
//!
//! Application ranks synchronise on barriers sized to the job's current node
//! set, and GPUs serialise allocation windows on mutexes. Both are built on
//! the ticket/notify pattern: a waiter draws a ticket, the releasing side
//! emits a keyed notify event, and the waiter resumes via
//! `recv_event_by_key_from_self`. All waiters of one barrier generation are
//! released at the same virtual time instant.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use serde::Serialize;

use dslab_core::async_mode::EventKey;
use dslab_core::SimulationContext;

#[derive(Clone, Serialize)]
struct SyncNotify {
    ticket: EventKey,
}

/// Shared home for all barriers and mutexes of one simulation: a dedicated
/// handler-less context plus a monotone ticket counter so notify keys never
/// collide across primitives.
pub struct SyncContext {
    ctx: SimulationContext,
    next_ticket: Cell<EventKey>,
}

impl SyncContext {
    pub fn new(ctx: SimulationContext) -> Rc<Self> {
        ctx.register_key_getter_for::<SyncNotify>(|notify| notify.ticket);
        Rc::new(SyncContext {
            ctx,
            next_ticket: Cell::new(0),
        })
    }

    fn issue_ticket(&self) -> EventKey {
        let ticket = self.next_ticket.get();
        self.next_ticket.set(ticket + 1);
        ticket
    }

    fn notify(&self, ticket: EventKey) {
        self.ctx.emit_self_now(SyncNotify { ticket });
    }

    async fn wait_for(&self, ticket: EventKey) {
        self.ctx.recv_event_by_key_from_self::<SyncNotify>(ticket).await;
    }
}

/// Cyclic barrier over virtual time.
pub struct Barrier {
    sync: Rc<SyncContext>,
    arity: usize,
    waiters: RefCell<Vec<EventKey>>,
}

impl Barrier {
    pub fn new(sync: Rc<SyncContext>, arity: usize) -> Rc<Self> {
        assert!(arity > 0, "barrier arity must be positive");
        Rc::new(Barrier {
            sync,
            arity,
            waiters: RefCell::new(Vec::new()),
        })
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Blocks until `arity` parties have arrived; the last arrival releases
    /// everyone at the current virtual time.
    pub async fn wait(&self) {
        let ticket = self.sync.issue_ticket();
        self.waiters.borrow_mut().push(ticket);
        if self.waiters.borrow().len() == self.arity {
            for waiter in self.waiters.borrow_mut().drain(..) {
                self.sync.notify(waiter);
            }
        }
        self.sync.wait_for(ticket).await;
    }
}

/// FIFO mutex over virtual time. `acquire`/`release` are split because locks
/// are frequently passed across suspension points (GPU allocation windows).
pub struct Mutex {
    sync: Rc<SyncContext>,
    locked: Cell<bool>,
    queue: RefCell<VecDeque<EventKey>>,
}

impl Mutex {
    pub fn new(sync: Rc<SyncContext>) -> Rc<Self> {
        Rc::new(Mutex {
            sync,
            locked: Cell::new(false),
            queue: RefCell::new(VecDeque::new()),
        })
    }

    pub async fn acquire(&self) {
        if !self.locked.get() {
            self.locked.set(true);
            return;
        }
        let ticket = self.sync.issue_ticket();
        self.queue.borrow_mut().push_back(ticket);
        // ownership is handed over directly by release(), `locked` stays set
        self.sync.wait_for(ticket).await;
    }

    pub fn release(&self) {
        debug_assert!(self.locked.get(), "release of an unlocked mutex");
        if let Some(next) = self.queue.borrow_mut().pop_front() {
            self.sync.notify(next);
        } else {
            self.locked.set(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dslab_core::Simulation;

    #[test]
    fn barrier_releases_all_waiters_at_last_arrival() {
        let mut sim = Simulation::new(123);
        let sync = SyncContext::new(sim.create_context("sync"));
        let barrier = Barrier::new(sync, 3);
        let times = Rc::new(RefCell::new(Vec::new()));

        for rank in 0..3u32 {
            let barrier = barrier.clone();
            let times = times.clone();
            let ctx = sim.create_context(format!("rank-{}", rank));
            sim.spawn(async move {
                ctx.sleep(rank as f64).await;
                barrier.wait().await;
                times.borrow_mut().push(ctx.time());
            });
        }

        sim.step_until_no_events();
        assert_eq!(*times.borrow(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn barrier_is_reusable() {
        let mut sim = Simulation::new(123);
        let sync = SyncContext::new(sim.create_context("sync"));
        let barrier = Barrier::new(sync, 2);
        let rounds = Rc::new(Cell::new(0u32));

        for rank in 0..2u32 {
            let barrier = barrier.clone();
            let rounds = rounds.clone();
            let ctx = sim.create_context(format!("rank-{}", rank));
            sim.spawn(async move {
                for _ in 0..3 {
                    ctx.sleep(1.0 + rank as f64).await;
                    barrier.wait().await;
                }
                if rank == 0 {
                    rounds.set(rounds.get() + 3);
                }
            });
        }

        sim.step_until_no_events();
        assert_eq!(rounds.get(), 3);
        assert_eq!(sim.time(), 6.0);
    }

    #[test]
    fn mutex_serialises_holders_in_fifo_order() {
        let mut sim = Simulation::new(123);
        let sync = SyncContext::new(sim.create_context("sync"));
        let mutex = Mutex::new(sync);
        let order = Rc::new(RefCell::new(Vec::new()));

        for rank in 0..3u32 {
            let mutex = mutex.clone();
            let order = order.clone();
            let ctx = sim.create_context(format!("rank-{}", rank));
            sim.spawn(async move {
                ctx.sleep(rank as f64 * 0.1).await;
                mutex.acquire().await;
                order.borrow_mut().push((rank, ctx.time()));
                ctx.sleep(10.0).await;
                mutex.release();
            });
        }

        sim.step_until_no_events();
        let order = order.borrow();
        assert_eq!(order[0].0, 0);
        assert_eq!(order[1], (1, 10.0));
        assert_eq!(order[2], (2, 20.0));
    }
}
