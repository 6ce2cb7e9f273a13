//! The kernel's single god-object: one `KernelContext` owns the arena, the
//! ready queue, the named-port map, and is borrowed mutably by the SVC
//! dispatcher for the duration of a handler. "One shared piece of kernel
//! state, one lock", except the lock here is explicit and held for the
//! whole handler rather than only around individual field accesses, so
//! that every SVC handler is serialized against every other one.

use std::collections::BTreeMap;

use spin::Mutex;

use crate::arbiter::{AddressArbiter, ArbitrationType};
use crate::config::KernelConfig;
use crate::error::{ERR_INVALID_HANDLE, KernelError, KernelResult, RESULT_SUCCESS, RESULT_TIMEOUT, ResultCode};
use crate::handle::{Handle, HandleTable};
use crate::ipc::port::{ClientPort, ServerPort};
use crate::ipc::session::{ClientSession, PendingRequest, ServerSession, SessionCore, SessionId};
use crate::memory::vma::Permission;
use crate::memory::vm_manager::{ControlMemoryOp, MemoryRegion};
use crate::object::{KernelObject, ObjectArena, ObjectId, ResourceLimit};
use crate::process::{Process, ProcessId, ProcessState};
use crate::scheduler::ReadyQueue;
use crate::shmem::SharedMemory;
use crate::sync::event::{Event, ResetType};
use crate::sync::mutex::Mutex as KMutex;
use crate::sync::semaphore::Semaphore;
use crate::sync::timer::Timer;
use crate::thread::{Thread, ThreadId, ThreadState};
use crate::timing::TimingWheel;
use crate::wait::WaitObject;
use crate::wait::{SignalOutcome, Wakeup};

const MAX_PORT_NAME_LEN: usize = 11;

pub struct KernelContext {
    pub config: KernelConfig,
    arena: ObjectArena,
    thread_objects: BTreeMap<ThreadId, ObjectId>,
    process_objects: BTreeMap<ProcessId, ObjectId>,
    ready_queue: ReadyQueue,
    current_thread: Option<ThreadId>,
    named_ports: BTreeMap<String, ObjectId>,
    sessions: BTreeMap<SessionId, SessionCore>,
    timing: TimingWheel,
    next_thread_id: u32,
    next_process_id: u32,
    next_session_id: u32,
    /// Explicit global kernel lock. `&mut self` already serializes access
    /// at the Rust level; this field exists so the serialization invariant
    /// is named explicitly, and so a future multi-host-thread dispatcher
    /// (out of scope today) has a single place to widen.
    hle_lock: Mutex<()>,
}

/// A translated IPC message together with the handles freshly installed in
/// the receiving process's table, in `handles_to_install` order. The
/// destination TLS encoding of `message` is the embedding emulator's job --
/// this crate stops at "here are the words and the handle numbers to write".
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub message: crate::ipc::translation::TranslatedMessage,
    pub installed_handles: Vec<Handle>,
}

/// Result of a `reply_and_receive` call: which of the waited-on handles (if
/// any) was immediately ready, and the reply delivered to the previous
/// caller (if a `reply_target` was given and a request was pending).
#[derive(Debug, Clone)]
pub struct ReplyAndReceiveOutcome {
    pub woken_index: Option<usize>,
    pub delivered: Option<DeliveredMessage>,
}

impl KernelContext {
    pub fn new(config: KernelConfig) -> Self {
        KernelContext {
            config,
            arena: ObjectArena::new(),
            thread_objects: BTreeMap::new(),
            process_objects: BTreeMap::new(),
            ready_queue: ReadyQueue::new(),
            current_thread: None,
            named_ports: BTreeMap::new(),
            sessions: BTreeMap::new(),
            timing: TimingWheel::new(),
            next_thread_id: 1,
            next_process_id: 1,
            next_session_id: 1,
            hle_lock: Mutex::new(()),
        }
    }

    /// Acquire the HLE lock for the duration of `f`. Every public
    /// operation that mutates kernel state goes through this so the
    /// "one handler runs at a time" invariant has one textual home.
    fn with_hle_lock<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let self_ptr: *mut Self = self;
        let _guard = self.hle_lock.lock();
        // SAFETY: `_guard` borrows only `self.hle_lock`; `self_ptr` was
        // taken before the borrow and is used here as the sole live
        // reference to `*self` for the duration of `f`, matching the
        // `&mut self` access `f(self)` would have had without the lock.
        f(unsafe { &mut *self_ptr })
    }

    // ---- process / thread lifecycle -----------------------------------

    pub fn create_process(&mut self, name: impl Into<String>) -> ProcessId {
        self.with_hle_lock(|this| {
            let pid = ProcessId(this.next_process_id);
            this.next_process_id += 1;
            let limit_id = this.arena.insert(KernelObject::ResourceLimit(ResourceLimit::default()));
            let process = Process::new(pid, name, limit_id, &this.config);
            let oid = this.arena.insert(KernelObject::Process(process));
            this.process_objects.insert(pid, oid);
            log::info!("process {:?} created", pid);
            pid
        })
    }

    fn process_object_id(&self, pid: ProcessId) -> KernelResult<ObjectId> {
        self.process_objects.get(&pid).copied().ok_or(KernelError::NotFound)
    }

    pub fn process_mut(&mut self, pid: ProcessId) -> KernelResult<&mut Process> {
        let oid = self.process_object_id(pid)?;
        match self.arena.get_mut(oid) {
            Some(KernelObject::Process(p)) => Ok(p),
            _ => Err(KernelError::NotFound),
        }
    }

    pub fn process(&self, pid: ProcessId) -> KernelResult<&Process> {
        let oid = self.process_object_id(pid)?;
        match self.arena.get(oid) {
            Some(KernelObject::Process(p)) => Ok(p),
            _ => Err(KernelError::NotFound),
        }
    }

    fn thread_object_id(&self, tid: ThreadId) -> KernelResult<ObjectId> {
        self.thread_objects.get(&tid).copied().ok_or(KernelError::NotFound)
    }

    pub fn thread_mut(&mut self, tid: ThreadId) -> KernelResult<&mut Thread> {
        let oid = self.thread_object_id(tid)?;
        match self.arena.get_mut(oid) {
            Some(KernelObject::Thread(t)) => Ok(t),
            _ => Err(KernelError::NotFound),
        }
    }

    pub fn thread(&self, tid: ThreadId) -> KernelResult<&Thread> {
        let oid = self.thread_object_id(tid)?;
        match self.arena.get(oid) {
            Some(KernelObject::Thread(t)) => Ok(t),
            _ => Err(KernelError::NotFound),
        }
    }

    pub fn current_thread_id(&self) -> Option<ThreadId> {
        self.current_thread
    }

    fn thread_priority(&self, tid: ThreadId) -> u8 {
        self.thread(tid).map(|t| t.priority).unwrap_or(u8::MAX)
    }

    pub fn create_thread(
        &mut self,
        process: ProcessId,
        name: impl Into<String>,
        priority: u8,
        entry_point: u32,
        stack_top: u32,
    ) -> KernelResult<ThreadId> {
        self.with_hle_lock(|this| {
            if (priority as usize) >= crate::scheduler::PRIORITY_LEVELS {
                return Err(KernelError::OutOfRange);
            }
            let tid = ThreadId(this.next_thread_id);
            this.next_thread_id += 1;
            let mut thread = Thread::new(tid, process, name, priority);
            thread.entry_point = entry_point;
            thread.stack_top = stack_top;
            thread.state = ThreadState::Ready;
            let oid = this.arena.insert(KernelObject::Thread(thread));
            this.thread_objects.insert(tid, oid);
            this.process_mut(process)?.add_thread(tid);
            this.ready_queue.push_back(priority, tid);
            log::info!("thread {:?} created in process {:?} at priority {}", tid, process, priority);
            Ok(tid)
        })
    }

    /// Change a thread's nominal priority. Recomputes its effective priority
    /// (nominal may still be overridden by a held mutex's pending priority)
    /// and repositions it in the ready queue if that changes.
    pub fn set_thread_priority(&mut self, tid: ThreadId, priority: u8) {
        self.with_hle_lock(|this| {
            if let Ok(t) = this.thread_mut(tid) {
                t.base_priority = priority;
            }
            this.update_priority(tid);
        })
    }

    /// Exit a thread: mark it Dead, remove it from the ready queue, detach
    /// it from every wait set, release its held mutexes, and free its slot
    /// in its owning process.
    pub fn exit_thread(&mut self, tid: ThreadId) -> KernelResult<()> {
        self.with_hle_lock(|this| {
            let (priority, waiting_on, held_mutexes, process) = {
                let t = this.thread_mut(tid)?;
                let priority = t.priority;
                let waiting_on = std::mem::take(&mut t.waiting_on);
                let held_mutexes = std::mem::take(&mut t.held_mutexes);
                t.state = ThreadState::Dead;
                (priority, waiting_on, held_mutexes, t.process)
            };
            this.ready_queue.remove(priority, tid);
            for oid in waiting_on {
                this.object_remove_waiter(oid, tid);
            }
            for mid in held_mutexes {
                this.force_release_mutex(mid, tid)?;
            }
            this.process_mut(process)?.remove_thread(tid);
            if this.current_thread == Some(tid) {
                this.current_thread = None;
            }
            log::info!("thread {:?} exited", tid);
            Ok(())
        })
    }

    /// Exit every thread in a process, the invoking thread last, then mark
    /// the process itself exited.
    pub fn exit_process(&mut self, pid: ProcessId, invoking: ThreadId) -> KernelResult<()> {
        let threads = self.process(pid)?.threads.clone();
        for tid in &threads {
            if *tid != invoking {
                self.exit_thread(*tid)?;
            }
        }
        self.exit_thread(invoking)?;
        if let Ok(p) = self.process_mut(pid) {
            p.state = ProcessState::Exited;
        }
        Ok(())
    }

    fn force_release_mutex(&mut self, mutex_id: ObjectId, holder: ThreadId) -> KernelResult<()> {
        let next_holder = match self.arena.get_mut(mutex_id) {
            Some(KernelObject::Mutex(m)) if m.holder == Some(holder) => {
                m.lock_count = 0;
                m.holder = None;
                m.select_next_holder(|_| 0)
            }
            _ => return Ok(()),
        };
        if let Some(next) = next_holder {
            self.transfer_mutex(mutex_id, next);
        }
        Ok(())
    }

    // ---- scheduling -----------------------------------------------------

    pub fn make_ready(&mut self, tid: ThreadId) {
        if let Ok(t) = self.thread_mut(tid) {
            t.state = ThreadState::Ready;
            let p = t.priority;
            self.ready_queue.push_back(p, tid);
        }
    }

    /// Pick the next thread to run: boost starved threads if enabled, then
    /// preempt the current thread only for a strictly-higher-priority
    /// candidate.
    pub fn reschedule(&mut self) {
        self.with_hle_lock(|this| this.reschedule_locked());
    }

    fn reschedule_locked(&mut self) {
        if self.config.priority_boost_enabled {
            self.boost_starved_threads();
        }

        let cur = self.current_thread;
        let next = match cur {
            Some(cur_id) => {
                let cur_prio = self.thread_priority(cur_id);
                let still_running = self
                    .thread(cur_id)
                    .map(|t| t.state == ThreadState::Running)
                    .unwrap_or(false);
                if still_running {
                    match self.ready_queue.pop_first_better(cur_prio) {
                        Some(n) => Some(n),
                        None => None,
                    }
                } else {
                    self.ready_queue.pop_first()
                }
            }
            None => self.ready_queue.pop_first(),
        };

        let Some(next_id) = next else {
            return;
        };
        if Some(next_id) == cur {
            return;
        }

        if let Some(cur_id) = cur {
            if let Ok(t) = self.thread_mut(cur_id) {
                if t.state == ThreadState::Running {
                    t.state = ThreadState::Ready;
                    let p = t.priority;
                    self.ready_queue.push_front(p, cur_id);
                }
            }
        }

        if let Ok(t) = self.thread_mut(next_id) {
            t.state = ThreadState::Running;
            t.ticks_since_ready = 0;
        }
        self.current_thread = Some(next_id);
    }

    fn boost_starved_threads(&mut self) {
        let threshold = self.config.priority_boost_threshold_ticks;
        let floor = self.config.priority_boost_floor;
        let candidates: Vec<ThreadId> = self
            .thread_objects
            .keys()
            .copied()
            .filter(|&tid| {
                self.thread(tid)
                    .map(|t| t.state == ThreadState::Ready && t.ticks_since_ready > threshold)
                    .unwrap_or(false)
            })
            .collect();
        let head_priority = self.ready_queue.first_priority().unwrap_or(floor);
        let new_prio = head_priority.saturating_sub(1).max(floor);
        for tid in candidates {
            if let Ok(t) = self.thread_mut(tid) {
                let old = t.priority;
                if new_prio < old {
                    t.priority = new_prio;
                    t.ticks_since_ready = 0;
                    self.ready_queue.reposition(tid, old, new_prio);
                }
            }
        }
    }

    /// Advance the host-supplied timing source and resolve every timed
    /// wait and armed timer whose deadline has passed.
    pub fn advance_time(&mut self, elapsed_ns: u64) {
        self.with_hle_lock(|this| {
            let now = this.timing.advance(elapsed_ns);

            let ready: Vec<ThreadId> = this
                .thread_objects
                .keys()
                .copied()
                .filter(|&tid| this.thread(tid).map(|t| t.state == ThreadState::Ready).unwrap_or(false))
                .collect();
            for tid in ready {
                if let Ok(t) = this.thread_mut(tid) {
                    t.ticks_since_ready = t.ticks_since_ready.saturating_add(elapsed_ns);
                }
            }

            let timed_out: Vec<ThreadId> = this
                .thread_objects
                .keys()
                .copied()
                .filter(|&tid| {
                    this.thread(tid)
                        .map(|t| t.state.is_waiting() && t.wake_up_tick.is_some_and(|d| d <= now))
                        .unwrap_or(false)
                })
                .collect();
            for tid in timed_out {
                this.time_out_thread(tid);
            }

            let due_timers = this
                .arena
                .ids_matching(|obj| matches!(obj, KernelObject::Timer(t) if t.due_tick.is_some_and(|d| d <= now)));
            for oid in due_timers {
                let outcome = match this.arena.get_mut(oid) {
                    Some(KernelObject::Timer(t)) => t.fire(now),
                    _ => continue,
                };
                match outcome {
                    SignalOutcome::Pulse(woken) => {
                        for tid in woken {
                            this.resume_satisfied_waiter(tid, oid);
                        }
                    }
                    SignalOutcome::Level => this.signal_object(oid),
                }
            }
        });
    }

    fn time_out_thread(&mut self, tid: ThreadId) {
        let waiting_on = match self.thread_mut(tid) {
            Ok(t) => {
                t.wakeup_reason = Some(Wakeup::TimedOut);
                t.registers.set_return(RESULT_TIMEOUT.0);
                std::mem::take(&mut t.waiting_on)
            }
            Err(_) => return,
        };
        for oid in waiting_on {
            self.object_remove_waiter(oid, tid);
        }
        if let Ok(t) = self.thread_mut(tid) {
            t.clear_wait();
        }
        self.make_ready(tid);
    }

    // ---- handles ----------------------------------------------------------

    pub fn resolve_handle(&self, process: ProcessId, thread: ThreadId, handle: Handle) -> KernelResult<ObjectId> {
        if handle.is_current_process() {
            return self.process_object_id(process);
        }
        if handle.is_current_thread() {
            return self.thread_object_id(thread);
        }
        self.process(process)?.handles.get(handle)
    }

    pub fn handle_table_mut(&mut self, process: ProcessId) -> KernelResult<&mut HandleTable> {
        Ok(&mut self.process_mut(process)?.handles)
    }

    pub fn create_handle(&mut self, process: ProcessId, object: ObjectId) -> KernelResult<Handle> {
        self.handle_table_mut(process)?.create(object)
    }

    pub fn duplicate_handle(&mut self, process: ProcessId, handle: Handle) -> KernelResult<Handle> {
        self.handle_table_mut(process)?.duplicate(handle)
    }

    pub fn close_handle(&mut self, process: ProcessId, handle: Handle) -> KernelResult<()> {
        self.handle_table_mut(process)?.close(handle)?;
        Ok(())
    }

    // ---- wait-object dispatch (tagged-variant match over KernelObject) ---

    fn object_should_wait(&self, oid: ObjectId, thread: ThreadId) -> bool {
        match self.arena.get(oid) {
            Some(KernelObject::Mutex(m)) => m.should_wait(thread),
            Some(KernelObject::Semaphore(s)) => crate::wait::WaitObject::should_wait(s, thread),
            Some(KernelObject::Event(e)) => crate::wait::WaitObject::should_wait(e, thread),
            Some(KernelObject::Timer(t)) => crate::wait::WaitObject::should_wait(t, thread),
            Some(KernelObject::ServerPort(p)) => crate::wait::WaitObject::should_wait(p, thread),
            Some(KernelObject::ServerSession(s)) => self
                .sessions
                .get(&s.session)
                .map(|c| c.pending_request.is_none())
                .unwrap_or(true),
            _ => true,
        }
    }

    fn object_acquire(&mut self, oid: ObjectId, thread: ThreadId) {
        match self.arena.get_mut(oid) {
            Some(KernelObject::Mutex(m)) => {
                m.acquire(thread);
                if let Ok(t) = self.thread_mut(thread) {
                    t.held_mutexes.push(oid);
                }
                self.recompute_mutex_pending_priority(oid);
                self.update_priority(thread);
            }
            Some(KernelObject::Semaphore(s)) => crate::wait::WaitObject::acquire(s, thread),
            Some(KernelObject::Event(e)) => crate::wait::WaitObject::acquire(e, thread),
            Some(KernelObject::Timer(t)) => crate::wait::WaitObject::acquire(t, thread),
            Some(KernelObject::ServerPort(p)) => crate::wait::WaitObject::acquire(p, thread),
            Some(KernelObject::ServerSession(_)) => {}
            _ => {}
        }
    }

    fn object_add_waiter(&mut self, oid: ObjectId, thread: ThreadId) {
        match self.arena.get_mut(oid) {
            Some(KernelObject::Mutex(m)) => {
                m.add_waiter(thread);
                if let Ok(t) = self.thread_mut(thread) {
                    t.waiting_for_mutex = Some(oid);
                }
            }
            Some(KernelObject::Semaphore(s)) => crate::wait::WaitObject::add_waiter(s, thread),
            Some(KernelObject::Event(e)) => crate::wait::WaitObject::add_waiter(e, thread),
            Some(KernelObject::Timer(t)) => crate::wait::WaitObject::add_waiter(t, thread),
            Some(KernelObject::ServerPort(p)) => crate::wait::WaitObject::add_waiter(p, thread),
            Some(KernelObject::ServerSession(s)) => crate::wait::WaitObject::add_waiter(s, thread),
            _ => {}
        }
        if matches!(self.arena.get(oid), Some(KernelObject::Mutex(_))) {
            self.recompute_mutex_pending_priority(oid);
            if let Some(holder) = self.mutex_holder(oid) {
                self.update_priority(holder);
            }
        }
    }

    fn object_remove_waiter(&mut self, oid: ObjectId, thread: ThreadId) {
        match self.arena.get_mut(oid) {
            Some(KernelObject::Mutex(m)) => m.remove_waiter(thread),
            Some(KernelObject::Semaphore(s)) => crate::wait::WaitObject::remove_waiter(s, thread),
            Some(KernelObject::Event(e)) => crate::wait::WaitObject::remove_waiter(e, thread),
            Some(KernelObject::Timer(t)) => crate::wait::WaitObject::remove_waiter(t, thread),
            Some(KernelObject::ServerPort(p)) => crate::wait::WaitObject::remove_waiter(p, thread),
            Some(KernelObject::ServerSession(s)) => crate::wait::WaitObject::remove_waiter(s, thread),
            _ => {}
        }
        if matches!(self.arena.get(oid), Some(KernelObject::Mutex(_))) {
            self.recompute_mutex_pending_priority(oid);
        }
    }

    fn object_wake_all_waiters(&mut self, oid: ObjectId) -> Vec<ThreadId> {
        match self.arena.get_mut(oid) {
            Some(KernelObject::Mutex(m)) => m.wake_up_all_waiters(),
            Some(KernelObject::Semaphore(s)) => crate::wait::WaitObject::wake_up_all_waiters(s),
            Some(KernelObject::Event(e)) => crate::wait::WaitObject::wake_up_all_waiters(e),
            Some(KernelObject::Timer(t)) => crate::wait::WaitObject::wake_up_all_waiters(t),
            Some(KernelObject::ServerPort(p)) => crate::wait::WaitObject::wake_up_all_waiters(p),
            Some(KernelObject::ServerSession(s)) => crate::wait::WaitObject::wake_up_all_waiters(s),
            _ => Vec::new(),
        }
    }

    fn mutex_holder(&self, oid: ObjectId) -> Option<ThreadId> {
        match self.arena.get(oid) {
            Some(KernelObject::Mutex(m)) => m.holder,
            _ => None,
        }
    }

    fn recompute_mutex_pending_priority(&mut self, oid: ObjectId) {
        let priorities: Vec<u8> = match self.arena.get(oid) {
            Some(KernelObject::Mutex(m)) => m.pending_iter().map(|t| self.thread_priority(t)).collect(),
            _ => return,
        };
        let best = priorities.into_iter().min();
        if let Some(KernelObject::Mutex(m)) = self.arena.get_mut(oid) {
            m.set_pending_priority(best);
        }
    }

    /// Priority inheritance: `best = min(nominal, min over
    /// held_mutexes of mutex.priority)`.
    fn update_priority(&mut self, tid: ThreadId) {
        let (nominal, held, old, state) = match self.thread(tid) {
            Ok(t) => (t.base_priority, t.held_mutexes.clone(), t.priority, t.state),
            Err(_) => return,
        };
        let mut best = nominal;
        for mid in &held {
            if let Some(KernelObject::Mutex(m)) = self.arena.get(*mid) {
                if let Some(p) = m.priority() {
                    best = best.min(p);
                }
            }
        }
        if best != old {
            if let Ok(t) = self.thread_mut(tid) {
                t.priority = best;
            }
            if state == ThreadState::Ready {
                self.ready_queue.reposition(tid, old, best);
            }
            // Climb the chain: if this thread is itself pending on another
            // mutex, that mutex's cached pending priority and its holder's
            // effective priority may need to change too.
            let waiting_for = self.thread(tid).ok().and_then(|t| t.waiting_for_mutex);
            if let Some(mid) = waiting_for {
                self.recompute_mutex_pending_priority(mid);
                if let Some(holder) = self.mutex_holder(mid) {
                    self.update_priority(holder);
                }
            }
        }
    }

    /// FIFO resumption pass over an object's current waiters.
    fn signal_object(&mut self, oid: ObjectId) {
        let waiters = self.object_wake_all_waiters(oid);
        for tid in waiters {
            if !self.try_wake_waiter(tid, oid) {
                self.object_add_waiter(oid, tid);
            }
        }
    }

    /// Resume `tid` on account of `oid`, without re-checking
    /// `object_should_wait` on `oid` itself. Used when the object's own
    /// release/signal logic already mutated its state to account for this
    /// particular waiter (a semaphore's count already decremented for it, an
    /// event or timer already consumed for it) -- re-running `should_wait`
    /// at that point would observe the post-consumption state and refuse to
    /// wake anyone, the same double-accounting bug `try_wake_waiter` avoids
    /// by checking first and only then consuming.
    fn resume_satisfied_waiter(&mut self, tid: ThreadId, oid: ObjectId) {
        let (state, waiting_on) = match self.thread(tid) {
            Ok(t) => (t.state, t.waiting_on.clone()),
            Err(_) => return,
        };
        match state {
            ThreadState::WaitSynchAny => {
                let index = waiting_on.iter().position(|&o| o == oid);
                for &other in &waiting_on {
                    if other != oid {
                        self.object_remove_waiter(other, tid);
                    }
                }
                if let Ok(t) = self.thread_mut(tid) {
                    t.signaled_index = index;
                    t.wakeup_reason = Some(Wakeup::ObjectSignaled { index });
                    t.registers.set_return(RESULT_SUCCESS.0);
                    t.clear_wait();
                }
                self.make_ready(tid);
            }
            ThreadState::WaitSynchAll => {
                let rest_ready = waiting_on.iter().all(|&o| o == oid || !self.object_should_wait(o, tid));
                if rest_ready {
                    for &o in &waiting_on {
                        if o != oid {
                            self.object_acquire(o, tid);
                        }
                        self.object_remove_waiter(o, tid);
                    }
                    if let Ok(t) = self.thread_mut(tid) {
                        t.wakeup_reason = Some(Wakeup::ObjectSignaled { index: None });
                        t.registers.set_return(RESULT_SUCCESS.0);
                        t.clear_wait();
                    }
                    self.make_ready(tid);
                } else {
                    // Not every other awaited object is ready yet; this
                    // object already dropped it from its own waiter list
                    // (it was in `woken`), so put it back.
                    self.object_add_waiter(oid, tid);
                }
            }
            _ => {}
        }
    }

    fn try_wake_waiter(&mut self, tid: ThreadId, signaled_hint: ObjectId) -> bool {
        let (state, waiting_on) = match self.thread(tid) {
            Ok(t) => (t.state, t.waiting_on.clone()),
            Err(_) => return false,
        };
        match state {
            ThreadState::WaitSynchAny => {
                for (i, &oid) in waiting_on.iter().enumerate() {
                    if !self.object_should_wait(oid, tid) {
                        self.object_acquire(oid, tid);
                        for &other in &waiting_on {
                            if other != oid {
                                self.object_remove_waiter(other, tid);
                            }
                        }
                        if let Ok(t) = self.thread_mut(tid) {
                            t.signaled_index = Some(i);
                            t.wakeup_reason = Some(Wakeup::ObjectSignaled { index: Some(i) });
                            t.registers.set_return(RESULT_SUCCESS.0);
                            t.clear_wait();
                        }
                        self.make_ready(tid);
                        return true;
                    }
                }
                false
            }
            ThreadState::WaitSynchAll => {
                let all_ready = waiting_on.iter().all(|&oid| !self.object_should_wait(oid, tid));
                if all_ready {
                    for &oid in &waiting_on {
                        self.object_acquire(oid, tid);
                        self.object_remove_waiter(oid, tid);
                    }
                    if let Ok(t) = self.thread_mut(tid) {
                        t.wakeup_reason = Some(Wakeup::ObjectSignaled { index: None });
                        t.registers.set_return(RESULT_SUCCESS.0);
                        t.clear_wait();
                    }
                    self.make_ready(tid);
                    true
                } else {
                    false
                }
            }
            ThreadState::WaitArb => {
                if let Ok(t) = self.thread_mut(tid) {
                    t.wakeup_reason = Some(Wakeup::ArbiterSignaled);
                    t.registers.set_return(RESULT_SUCCESS.0);
                    t.clear_wait();
                    t.arbiter_wait_address = None;
                }
                self.make_ready(tid);
                true
            }
            ThreadState::WaitIpc if signaled_hint != ObjectId(0) => {
                self.make_ready(tid);
                true
            }
            _ => false,
        }
    }

    // ---- WaitSynchronization* ---------------------------------------------

    pub fn wait_synchronization_any(
        &mut self,
        thread: ThreadId,
        objects: &[ObjectId],
        timeout_ns: i64,
    ) -> (ResultCode, Option<usize>) {
        self.with_hle_lock(|this| {
            for (i, &oid) in objects.iter().enumerate() {
                if !this.object_should_wait(oid, thread) {
                    this.object_acquire(oid, thread);
                    return (RESULT_SUCCESS, Some(i));
                }
            }
            if timeout_ns == 0 {
                return (RESULT_TIMEOUT, None);
            }
            let wake_up_tick = if timeout_ns > 0 {
                Some(this.timing.now() + timeout_ns as u64)
            } else {
                None
            };
            if let Ok(t) = this.thread_mut(thread) {
                t.state = ThreadState::WaitSynchAny;
                t.waiting_on = objects.to_vec();
                t.wait_all = false;
                t.wake_up_tick = wake_up_tick;
            }
            for &oid in objects {
                this.object_add_waiter(oid, thread);
            }
            this.reschedule_locked();
            (RESULT_TIMEOUT, None)
        })
    }

    pub fn wait_synchronization_all(&mut self, thread: ThreadId, objects: &[ObjectId], timeout_ns: i64) -> ResultCode {
        self.with_hle_lock(|this| {
            let all_ready = objects.iter().all(|&oid| !this.object_should_wait(oid, thread));
            if all_ready {
                for &oid in objects {
                    this.object_acquire(oid, thread);
                }
                return RESULT_SUCCESS;
            }
            if timeout_ns == 0 {
                return RESULT_TIMEOUT;
            }
            let wake_up_tick = if timeout_ns > 0 {
                Some(this.timing.now() + timeout_ns as u64)
            } else {
                None
            };
            if let Ok(t) = this.thread_mut(thread) {
                t.state = ThreadState::WaitSynchAll;
                t.waiting_on = objects.to_vec();
                t.wait_all = true;
                t.wake_up_tick = wake_up_tick;
            }
            for &oid in objects {
                this.object_add_waiter(oid, thread);
            }
            this.reschedule_locked();
            RESULT_TIMEOUT
        })
    }

    pub fn sleep_thread(&mut self, thread: ThreadId, ns: i64) {
        self.with_hle_lock(|this| {
            if ns <= 0 {
                return;
            }
            let wake_up_tick = Some(this.timing.now() + ns as u64);
            if let Ok(t) = this.thread_mut(thread) {
                t.state = ThreadState::WaitSleep;
                t.wake_up_tick = wake_up_tick;
            }
            this.reschedule_locked();
        });
    }

    // ---- mutex --------------------------------------------------------

    pub fn create_mutex(&mut self, initial_locked: bool, owner: ThreadId) -> ObjectId {
        let m = if initial_locked { KMutex::new_locked(owner) } else { KMutex::new() };
        let oid = self.arena.insert(KernelObject::Mutex(m));
        if initial_locked {
            if let Ok(t) = self.thread_mut(owner) {
                t.held_mutexes.push(oid);
            }
        }
        oid
    }

    pub fn release_mutex(&mut self, thread: ThreadId, mutex: ObjectId) -> ResultCode {
        self.with_hle_lock(|this| {
            let fully_released = match this.arena.get_mut(mutex) {
                Some(KernelObject::Mutex(m)) => match m.release(thread) {
                    Ok(full) => full,
                    Err(()) => return ERR_INVALID_HANDLE,
                },
                _ => return ERR_INVALID_HANDLE,
            };
            if let Ok(t) = this.thread_mut(thread) {
                t.held_mutexes.retain(|&m| m != mutex);
            }
            if fully_released {
                let next = match this.arena.get(mutex) {
                    Some(KernelObject::Mutex(m)) => m.select_next_holder(|t| this.thread_priority(t)),
                    _ => None,
                };
                if let Some(next) = next {
                    this.transfer_mutex(mutex, next);
                }
            }
            this.update_priority(thread);
            RESULT_SUCCESS
        })
    }

    /// Hand a just-released mutex directly to `next_holder`, bypassing the
    /// general should_wait/acquire re-check in `try_wake_waiter` since the
    /// holder here was already chosen by `select_next_holder`.
    fn transfer_mutex(&mut self, mutex: ObjectId, next_holder: ThreadId) {
        if let Some(KernelObject::Mutex(m)) = self.arena.get_mut(mutex) {
            m.acquire(next_holder);
        }
        let waiting_on = self.thread(next_holder).map(|t| t.waiting_on.clone()).unwrap_or_default();
        for oid in waiting_on {
            if oid != mutex {
                self.object_remove_waiter(oid, next_holder);
            }
        }
        if let Ok(t) = self.thread_mut(next_holder) {
            t.held_mutexes.push(mutex);
            t.waiting_for_mutex = None;
            t.wakeup_reason = Some(Wakeup::ObjectSignaled { index: Some(0) });
            t.registers.set_return(RESULT_SUCCESS.0);
            t.clear_wait();
        }
        self.recompute_mutex_pending_priority(mutex);
        self.update_priority(next_holder);
        self.make_ready(next_holder);
    }

    // ---- semaphore ------------------------------------------------------

    pub fn create_semaphore(&mut self, initial: i32, max: i32) -> ObjectId {
        self.arena.insert(KernelObject::Semaphore(Semaphore::new(initial, max)))
    }

    pub fn release_semaphore(&mut self, semaphore: ObjectId, count: i32) -> KernelResult<i32> {
        self.with_hle_lock(|this| {
            let (old_count, woken) = match this.arena.get_mut(semaphore) {
                Some(KernelObject::Semaphore(s)) => {
                    let old = s.count;
                    let woken = s.release(count).map_err(|_| KernelError::OutOfRange)?;
                    (old, woken)
                }
                _ => return Err(KernelError::InvalidHandle),
            };
            for tid in woken {
                this.resume_satisfied_waiter(tid, semaphore);
            }
            Ok(old_count)
        })
    }

    // ---- event ------------------------------------------------------------

    pub fn create_event(&mut self, reset_type: ResetType) -> ObjectId {
        self.arena.insert(KernelObject::Event(Event::new(reset_type)))
    }

    pub fn signal_event(&mut self, event: ObjectId) -> KernelResult<()> {
        self.with_hle_lock(|this| {
            let outcome = match this.arena.get_mut(event) {
                Some(KernelObject::Event(e)) => e.signal(),
                _ => return Err(KernelError::InvalidHandle),
            };
            match outcome {
                SignalOutcome::Pulse(woken) => {
                    for tid in woken {
                        this.resume_satisfied_waiter(tid, event);
                    }
                }
                SignalOutcome::Level => this.signal_object(event),
            }
            Ok(())
        })
    }

    pub fn clear_event(&mut self, event: ObjectId) -> KernelResult<()> {
        match self.arena.get_mut(event) {
            Some(KernelObject::Event(e)) => {
                e.clear();
                Ok(())
            }
            _ => Err(KernelError::InvalidHandle),
        }
    }

    // ---- timer --------------------------------------------------------

    pub fn create_timer(&mut self, reset_type: ResetType) -> ObjectId {
        self.arena.insert(KernelObject::Timer(Timer::new(reset_type)))
    }

    pub fn set_timer(&mut self, timer: ObjectId, initial_ns: u64, interval_ns: u64) -> KernelResult<()> {
        let now = self.timing.now();
        match self.arena.get_mut(timer) {
            Some(KernelObject::Timer(t)) => {
                t.set(now, initial_ns, interval_ns);
                Ok(())
            }
            _ => Err(KernelError::InvalidHandle),
        }
    }

    pub fn cancel_timer(&mut self, timer: ObjectId) -> KernelResult<()> {
        match self.arena.get_mut(timer) {
            Some(KernelObject::Timer(t)) => {
                t.cancel();
                Ok(())
            }
            _ => Err(KernelError::InvalidHandle),
        }
    }

    pub fn clear_timer(&mut self, timer: ObjectId) -> KernelResult<()> {
        match self.arena.get_mut(timer) {
            Some(KernelObject::Timer(t)) => {
                t.clear();
                Ok(())
            }
            _ => Err(KernelError::InvalidHandle),
        }
    }

    // ---- address arbiter ------------------------------------------------

    pub fn create_address_arbiter(&mut self) -> ObjectId {
        self.arena.insert(KernelObject::AddressArbiter(AddressArbiter::new()))
    }

    pub fn arbitrate_address(
        &mut self,
        thread: ThreadId,
        arbiter: ObjectId,
        address: u32,
        kind: ArbitrationType,
        value: i32,
        timeout_ns: i64,
        read_current: impl FnOnce() -> i32,
        write_current: impl FnOnce(i32),
    ) -> ResultCode {
        self.with_hle_lock(|this| {
            let arb = match this.arena.get_mut(arbiter) {
                Some(KernelObject::AddressArbiter(a)) => a,
                _ => return ERR_INVALID_HANDLE,
            };
            if matches!(kind, ArbitrationType::Signal) {
                let n = value;
                let woken = arb.signal(address, n);
                for tid in woken {
                    this.try_wake_waiter(tid, arbiter);
                }
                return RESULT_SUCCESS;
            }

            let mut current = read_current();
            if kind.decrements() {
                current -= 1;
                write_current(current);
            }
            if current >= value {
                return RESULT_SUCCESS;
            }

            if timeout_ns == 0 {
                return RESULT_TIMEOUT;
            }
            let arb = match this.arena.get_mut(arbiter) {
                Some(KernelObject::AddressArbiter(a)) => a,
                _ => return ERR_INVALID_HANDLE,
            };
            arb.park(address, thread);
            let wake_up_tick = if kind.has_timeout() && timeout_ns > 0 {
                Some(this.timing.now() + timeout_ns as u64)
            } else {
                None
            };
            if let Ok(t) = this.thread_mut(thread) {
                t.state = ThreadState::WaitArb;
                t.arbiter_wait_address = Some(address);
                t.wake_up_tick = wake_up_tick;
            }
            this.reschedule_locked();
            RESULT_TIMEOUT
        })
    }

    // ---- memory ---------------------------------------------------------

    pub fn control_memory(
        &mut self,
        process: ProcessId,
        op: ControlMemoryOp,
        region: MemoryRegion,
        addr: u32,
        size: u32,
        permissions: Permission,
        linear: bool,
    ) -> KernelResult<u32> {
        self.process_mut(process)?.vm.control_memory(op, region, addr, size, permissions, linear)
    }

    pub fn query_memory(&self, process: ProcessId, addr: u32) -> KernelResult<(u32, u32, Permission, crate::memory::vma::MemInfoState)> {
        self.process(process)?.vm.query_memory(addr).ok_or(KernelError::NotFound)
    }

    pub fn create_memory_block(
        &mut self,
        owner: ProcessId,
        size: u32,
        owner_permission: Permission,
        other_permission: Permission,
    ) -> ObjectId {
        self.arena
            .insert(KernelObject::SharedMemory(SharedMemory::new(owner, size, owner_permission, other_permission)))
    }

    pub fn map_memory_block(&mut self, block: ObjectId, process: ProcessId, addr: u32) -> KernelResult<()> {
        let (size, perm) = match self.arena.get_mut(block) {
            Some(KernelObject::SharedMemory(s)) => {
                s.map(process, addr);
                (s.size, s.permission_for(process))
            }
            _ => return Err(KernelError::InvalidHandle),
        };
        self.process_mut(process)?.vm.map_backing_memory(
            addr,
            size,
            perm,
            crate::memory::vma::MemInfoState::Shared,
            crate::memory::vma::BackingKind::SharedMemory,
        )
    }

    pub fn unmap_memory_block(&mut self, block: ObjectId, process: ProcessId, addr: u32, size: u32) -> KernelResult<()> {
        match self.arena.get_mut(block) {
            Some(KernelObject::SharedMemory(s)) => s.unmap(process),
            _ => return Err(KernelError::InvalidHandle),
        }
        self.process_mut(process)?.vm.unmap(addr, size)
    }

    // ---- IPC: ports, sessions, translation -------------------------------

    pub fn create_port(&mut self, name: impl Into<String>, max_sessions: u32) -> KernelResult<(ObjectId, ObjectId)> {
        let name = name.into();
        if name.len() > MAX_PORT_NAME_LEN {
            return Err(KernelError::PortNameTooLong);
        }
        let server_id = self.arena.insert(KernelObject::ServerPort(ServerPort::new(name.clone(), max_sessions)));
        let client_id = self.arena.insert(KernelObject::ClientPort(ClientPort { server_port: server_id, name: name.clone() }));
        if !name.is_empty() {
            self.named_ports.insert(name, server_id);
        }
        Ok((client_id, server_id))
    }

    fn new_session_pair(&mut self, port: Option<ObjectId>) -> (ObjectId, ObjectId, SessionId) {
        let sid = SessionId(self.next_session_id);
        self.next_session_id += 1;
        self.sessions.insert(sid, SessionCore::new(port));
        let client = self.arena.insert(KernelObject::ClientSession(ClientSession { session: sid }));
        let server = self.arena.insert(KernelObject::ServerSession(ServerSession::new(sid)));
        (client, server, sid)
    }

    /// Connect a client by port name: looks up the named port, then does
    /// what `connect_to_server_port` does.
    pub fn connect_to_port(&mut self, thread: ThreadId, client_port_name: &str) -> KernelResult<ObjectId> {
        let server_port_id = self
            .named_ports
            .get(client_port_name)
            .copied()
            .ok_or(KernelError::NotFound)?;
        self.connect_to_server_port(thread, server_port_id)
    }

    pub fn connect_to_server_port(&mut self, thread: ThreadId, server_port_id: ObjectId) -> KernelResult<ObjectId> {
        let saturated = match self.arena.get(server_port_id) {
            Some(KernelObject::ServerPort(p)) => p.is_saturated(),
            _ => return Err(KernelError::NotFound),
        };
        if saturated {
            if let Some(KernelObject::ServerPort(p)) = self.arena.get_mut(server_port_id) {
                p.park_connect_waiter(thread);
            }
            return Err(KernelError::MaxConnectionsReached);
        }
        let (client, server, _sid) = self.new_session_pair(Some(server_port_id));
        if let Some(KernelObject::ServerPort(p)) = self.arena.get_mut(server_port_id) {
            p.enqueue_pending_session(server);
        }
        self.signal_object(server_port_id);
        Ok(client)
    }

    pub fn accept_session(&mut self, server_port: ObjectId) -> KernelResult<ObjectId> {
        match self.arena.get_mut(server_port) {
            Some(KernelObject::ServerPort(p)) => p.accept_session().ok_or(KernelError::NotFound),
            _ => Err(KernelError::InvalidHandle),
        }
    }

    fn session_id_of(&self, session_object: ObjectId) -> KernelResult<SessionId> {
        match self.arena.get(session_object) {
            Some(KernelObject::ClientSession(c)) => Ok(c.session),
            Some(KernelObject::ServerSession(s)) => Ok(s.session),
            _ => Err(KernelError::InvalidHandle),
        }
    }

    /// Send a synchronous IPC request: translate it into the destination's
    /// address space, park the calling thread as `WaitIpc`, and mark the
    /// session's pending-request slot so the server can observe it via
    /// `ReplyAndReceive`/`WaitSynch*` on its session half. Handles named by
    /// the request are not installed into the server's table yet -- that
    /// happens when the server actually claims the request via
    /// `take_incoming_request`, since the destination table is the *server's*
    /// and the server thread is not known until then.
    pub fn send_sync_request(
        &mut self,
        thread: ThreadId,
        client_session: ObjectId,
        request: crate::ipc::translation::ParsedMessage,
    ) -> KernelResult<ResultCode> {
        self.with_hle_lock(|this| {
            let sid = this.session_id_of(client_session)?;
            {
                let core = this.sessions.get(&sid).ok_or(KernelError::NotFound)?;
                crate::ipc::session::check_session_open(core)?;
            }
            let caller_pid = this.thread(thread)?.process.0;
            let translated = crate::ipc::translation::translate(&request, caller_pid)?;

            let core = this.sessions.get_mut(&sid).unwrap();
            core.pending_request = Some(PendingRequest { client_thread: thread, request: translated });

            if let Ok(t) = this.thread_mut(thread) {
                t.state = ThreadState::WaitIpc;
                t.wake_up_tick = None;
            }
            let server_session_id = this
                .find_server_session(sid)
                .ok_or(KernelError::SessionClosedByRemote)?;
            this.signal_object(server_session_id);
            this.reschedule_locked();
            Ok(RESULT_SUCCESS)
        })
    }

    fn find_server_session(&self, sid: SessionId) -> Option<ObjectId> {
        self.arena
            .iter()
            .find(|(_, obj)| matches!(obj, KernelObject::ServerSession(s) if s.session == sid))
            .map(|(id, _)| id)
    }

    /// Install `translated.handles_to_install` into `process`'s handle
    /// table. Atomic: if any single `create_handle` fails (table full), every
    /// handle already installed for this message is closed before the error
    /// is returned, so a partially-translated message never reaches a thread.
    fn install_translated_handles(
        &mut self,
        process: ProcessId,
        translated: &crate::ipc::translation::TranslatedMessage,
    ) -> KernelResult<Vec<Handle>> {
        let mut installed = Vec::with_capacity(translated.handles_to_install.len());
        for &oid in &translated.handles_to_install {
            match self.create_handle(process, oid) {
                Ok(h) => installed.push(h),
                Err(e) => {
                    for h in installed {
                        let _ = self.close_handle(process, h);
                    }
                    return Err(e);
                }
            }
        }
        Ok(installed)
    }

    /// Claim the request pending on `server_session` (woken via
    /// `ReplyAndReceive`'s wait phase) and install its handles into `thread`'s
    /// process. Does not clear `pending_request` -- the client is only woken
    /// once the server actually replies, via `reply_and_receive`.
    pub fn take_incoming_request(
        &mut self,
        thread: ThreadId,
        server_session: ObjectId,
    ) -> KernelResult<DeliveredMessage> {
        self.with_hle_lock(|this| {
            let sid = this.session_id_of(server_session)?;
            let request = this
                .sessions
                .get(&sid)
                .and_then(|c| c.pending_request.as_ref())
                .map(|r| r.request.clone())
                .ok_or(KernelError::NotFound)?;
            let process = this.thread(thread)?.process;
            let installed_handles = this.install_translated_handles(process, &request)?;
            Ok(DeliveredMessage { message: request, installed_handles })
        })
    }

    /// Reply to a pending request (if any) and then wait on the given
    /// session/port handles for the next one. The reply, if given, is
    /// translated and its handles installed into the *client's* table before
    /// the client is woken; a translation or install failure is delivered to
    /// the client as its `SendSyncRequest` result instead of a success code,
    /// and any handles partially installed for that reply are rolled back.
    pub fn reply_and_receive(
        &mut self,
        thread: ThreadId,
        handles: &[ObjectId],
        reply_target: Option<ObjectId>,
        reply: Option<crate::ipc::translation::ParsedMessage>,
    ) -> KernelResult<ReplyAndReceiveOutcome> {
        self.with_hle_lock(|this| {
            let mut delivered = None;
            if let Some(server_session) = reply_target {
                let sid = this.session_id_of(server_session)?;
                let pending = this.sessions.get_mut(&sid).and_then(|c| c.pending_request.take());
                if let Some(pending) = pending {
                    let client_thread = pending.client_thread;
                    let client_process = this.thread(client_thread).map(|t| t.process).ok();
                    let rc = match (reply, client_process) {
                        (Some(reply_msg), Some(client_process)) => {
                            let caller_pid = this.thread(thread).map(|t| t.process.0).unwrap_or(0);
                            match crate::ipc::translation::translate(&reply_msg, caller_pid) {
                                Ok(translated) => match this.install_translated_handles(client_process, &translated) {
                                    Ok(installed_handles) => {
                                        delivered = Some(DeliveredMessage { message: translated, installed_handles });
                                        RESULT_SUCCESS
                                    }
                                    Err(e) => e.into(),
                                },
                                Err(e) => e.into(),
                            }
                        }
                        _ => RESULT_SUCCESS,
                    };
                    if let Ok(t) = this.thread_mut(client_thread) {
                        t.registers.set_return(rc.0);
                        t.clear_wait();
                    }
                    this.make_ready(client_thread);
                }
            }

            if handles.is_empty() {
                return Ok(ReplyAndReceiveOutcome { woken_index: None, delivered });
            }

            for (i, &oid) in handles.iter().enumerate() {
                if !this.object_should_wait(oid, thread) {
                    this.object_acquire(oid, thread);
                    return Ok(ReplyAndReceiveOutcome { woken_index: Some(i), delivered });
                }
            }
            if let Ok(t) = this.thread_mut(thread) {
                t.state = ThreadState::WaitSynchAny;
                t.waiting_on = handles.to_vec();
            }
            for &oid in handles {
                this.object_add_waiter(oid, thread);
            }
            this.reschedule_locked();
            Ok(ReplyAndReceiveOutcome { woken_index: None, delivered })
        })
    }

    pub fn close_session_half(&mut self, session_object: ObjectId, is_client: bool) -> KernelResult<()> {
        let sid = self.session_id_of(session_object)?;
        if let Some(core) = self.sessions.get_mut(&sid) {
            if is_client {
                core.close_client();
            } else {
                core.close_server();
            }
            if let Some(pending) = core.pending_request.take() {
                if let Ok(t) = self.thread_mut(pending.client_thread) {
                    t.registers.set_return(crate::error::ERR_SESSION_CLOSED_BY_REMOTE.0);
                    t.clear_wait();
                }
                self.make_ready(pending.client_thread);
            }
        }
        Ok(())
    }

    // ---- resource limits --------------------------------------------------

    pub fn resource_limit_value(&self, process: ProcessId) -> KernelResult<ResourceLimit> {
        let limit_id = self.process(process)?.resource_limit;
        match self.arena.get(limit_id) {
            Some(KernelObject::ResourceLimit(r)) => Ok(*r),
            _ => Err(KernelError::NotFound),
        }
    }

    pub fn get_system_tick(&self) -> u64 {
        self.timing.now()
    }

    pub fn object_id_of_thread(&self, tid: ThreadId) -> Option<ObjectId> {
        self.thread_objects.get(&tid).copied()
    }

    /// The `Thread` kernel object an SVC handle resolved to, if it names a
    /// thread at all.
    pub fn thread_of(&self, oid: ObjectId) -> Option<ThreadId> {
        match self.arena.get(oid) {
            Some(KernelObject::Thread(t)) => Some(t.id),
            _ => None,
        }
    }

    pub fn client_port_server(&self, client_port: ObjectId) -> Option<ObjectId> {
        match self.arena.get(client_port) {
            Some(KernelObject::ClientPort(p)) => Some(p.server_port),
            _ => None,
        }
    }

    /// The `Process` kernel object an SVC handle resolved to, if it names a
    /// process at all.
    pub fn process_of(&self, oid: ObjectId) -> Option<ProcessId> {
        match self.arena.get(oid) {
            Some(KernelObject::Process(p)) => Some(p.id),
            _ => None,
        }
    }

    pub fn resource_limit_object(&self, oid: ObjectId) -> KernelResult<ResourceLimit> {
        match self.arena.get(oid) {
            Some(KernelObject::ResourceLimit(r)) => Ok(*r),
            _ => Err(KernelError::InvalidHandle),
        }
    }
}

impl Default for KernelContext {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (KernelContext, ProcessId, ThreadId) {
        let mut ctx = KernelContext::new(KernelConfig::default());
        let pid = ctx.create_process("test");
        let tid = ctx.create_thread(pid, "main", 30, 0x100000, 0x20000000).unwrap();
        ctx.current_thread = Some(tid);
        if let Ok(t) = ctx.thread_mut(tid) {
            t.state = ThreadState::Running;
        }
        ctx.ready_queue.remove(30, tid);
        (ctx, pid, tid)
    }

    #[test]
    fn mutex_acquisition_inherits_a_higher_priority_waiters_priority() {
        let mut ctx = KernelContext::new(KernelConfig::default());
        let pid = ctx.create_process("test");
        let a = ctx.create_thread(pid, "A", 20, 0, 0).unwrap();
        let c = ctx.create_thread(pid, "C", 60, 0, 0).unwrap();

        let mutex = ctx.create_mutex(true, c);
        assert_eq!(ctx.thread(c).unwrap().priority, 60);

        // A blocks on the mutex C holds.
        ctx.object_add_waiter(mutex, a);
        assert_eq!(ctx.thread(c).unwrap().priority, 20, "C should inherit A's priority while holding the mutex");

        ctx.release_mutex(c, mutex);
        assert_eq!(ctx.thread(c).unwrap().priority, 60, "C restored after release");
        assert_eq!(ctx.thread(a).unwrap().priority, 20);
        assert_eq!(ctx.mutex_holder(mutex), Some(a));
    }

    #[test]
    fn mutex_release_hands_off_fifo_among_equal_priority_waiters() {
        let mut ctx = KernelContext::new(KernelConfig::default());
        let pid = ctx.create_process("test");
        let h = ctx.create_thread(pid, "H", 50, 0, 0).unwrap();
        let w1 = ctx.create_thread(pid, "W1", 50, 0, 0).unwrap();
        let w2 = ctx.create_thread(pid, "W2", 50, 0, 0).unwrap();

        let mutex = ctx.create_mutex(true, h);
        ctx.object_add_waiter(mutex, w1);
        ctx.object_add_waiter(mutex, w2);

        ctx.release_mutex(h, mutex);
        assert_eq!(ctx.mutex_holder(mutex), Some(w1));
    }

    #[test]
    fn address_arbiter_signal_wakes_first_n() {
        let mut ctx = KernelContext::new(KernelConfig::default());
        let pid = ctx.create_process("test");
        let arb = ctx.create_address_arbiter();
        let threads: Vec<ThreadId> = (0..3).map(|i| ctx.create_thread(pid, format!("t{i}"), 30, 0, 0).unwrap()).collect();

        for &t in &threads {
            ctx.arbitrate_address(t, arb, 0x1000, ArbitrationType::WaitIfLessThan, 100, -1, || 0, |_| {});
        }
        for &t in &threads {
            assert_eq!(ctx.thread(t).unwrap().state, ThreadState::WaitArb);
        }

        ctx.arbitrate_address(threads[0], arb, 0x1000, ArbitrationType::Signal, 2, -1, || 0, |_| {});
        assert_eq!(ctx.thread(threads[0]).unwrap().state, ThreadState::Ready);
        assert_eq!(ctx.thread(threads[1]).unwrap().state, ThreadState::Ready);
        assert_eq!(ctx.thread(threads[2]).unwrap().state, ThreadState::WaitArb);
    }

    #[test]
    fn wait_synchronization1_succeeds_immediately_on_signaled_event() {
        let (mut ctx, _pid, tid) = setup();
        let event = ctx.create_event(ResetType::Sticky);
        ctx.signal_event(event).unwrap();
        let (rc, index) = ctx.wait_synchronization_any(tid, &[event], 0);
        assert_eq!(rc, RESULT_SUCCESS);
        assert_eq!(index, Some(0));
    }

    #[test]
    fn wait_synchronization1_times_out_with_zero_timeout() {
        let (mut ctx, _pid, tid) = setup();
        let event = ctx.create_event(ResetType::Sticky);
        let (rc, _) = ctx.wait_synchronization_any(tid, &[event], 0);
        assert_eq!(rc, RESULT_TIMEOUT);
    }

    #[test]
    fn control_memory_rejects_misaligned_size() {
        let (mut ctx, pid, _tid) = setup();
        let err = ctx
            .control_memory(pid, ControlMemoryOp::Commit, MemoryRegion::App, 0x08000000, 100, Permission::READ, false)
            .unwrap_err();
        assert_eq!(err, KernelError::MisalignedSize);
    }

    #[test]
    fn connect_to_port_rejects_overlong_names() {
        let mut ctx = KernelContext::new(KernelConfig::default());
        let err = ctx.create_port("way-too-long-name", 4).unwrap_err();
        assert_eq!(err, KernelError::PortNameTooLong);
    }

    #[test]
    fn wait_synch_times_out_after_the_timing_wheel_advances_past_the_deadline() {
        let (mut ctx, _pid, tid) = setup();
        let event = ctx.create_event(ResetType::Sticky);
        let (rc, index) = ctx.wait_synchronization_any(tid, &[event], 1_000_000);
        assert_eq!(rc, RESULT_TIMEOUT);
        assert_eq!(index, None);
        assert_eq!(ctx.thread(tid).unwrap().state, ThreadState::WaitSynchAny);

        ctx.advance_time(999_999);
        assert_eq!(ctx.thread(tid).unwrap().state, ThreadState::WaitSynchAny, "not yet due");

        ctx.advance_time(1);
        assert_eq!(ctx.thread(tid).unwrap().state, ThreadState::Ready);
        assert_eq!(ctx.thread(tid).unwrap().registers.r[0], RESULT_TIMEOUT.0);
    }

    #[test]
    fn round_trip_ipc_between_a_client_and_a_server_session() {
        let mut ctx = KernelContext::new(KernelConfig::default());
        let pid = ctx.create_process("test");
        let client_thread = ctx.create_thread(pid, "client", 30, 0, 0).unwrap();
        let server_thread = ctx.create_thread(pid, "server", 30, 0, 0).unwrap();
        ctx.thread_mut(client_thread).unwrap().state = ThreadState::Running;
        ctx.thread_mut(server_thread).unwrap().state = ThreadState::Running;
        ctx.ready_queue.remove(30, client_thread);
        ctx.ready_queue.remove(30, server_thread);

        let (_client_port, server_port) = ctx.create_port("srv:test", 1).unwrap();
        let client_session = ctx.connect_to_port(client_thread, "srv:test").unwrap();
        let server_session = ctx.accept_session(server_port).unwrap();

        // Server blocks waiting for a request.
        let recv = ctx.reply_and_receive(server_thread, &[server_session], None, None).unwrap();
        assert_eq!(recv.woken_index, None);
        assert_eq!(ctx.thread(server_thread).unwrap().state, ThreadState::WaitSynchAny);

        // Client sends a request carrying one moved handle (its own event
        // object) alongside a plain word, exercising handle translation.
        let moved_event = ctx.create_event(ResetType::Sticky);
        let request = crate::ipc::translation::ParsedMessage {
            header: crate::ipc::translation::CommandHeader { cmd_id: 1, normal_params: 1, translate_params: 1 },
            normal_words: vec![42],
            descriptors: vec![crate::ipc::translation::TranslateDescriptor::HandleMove(vec![moved_event])],
        };

        ctx.send_sync_request(client_thread, client_session, request).unwrap();
        assert_eq!(ctx.thread(client_thread).unwrap().state, ThreadState::WaitIpc);

        // Server's WaitSynchAny on [server_session] is satisfied by the signal
        // send_sync_request fired; it resumes and claims the request.
        assert_eq!(ctx.thread(server_thread).unwrap().state, ThreadState::Ready);
        let incoming = ctx.take_incoming_request(server_thread, server_session).unwrap();
        assert_eq!(incoming.message.normal_words, vec![42]);
        assert_eq!(incoming.installed_handles.len(), 1);
        // The handle now resolves to the same event in the server's own table.
        assert_eq!(ctx.handle_table_mut(pid).unwrap().get(incoming.installed_handles[0]), Ok(moved_event));

        // Server replies with cmd_id=1, word=1764, and waits for the next request.
        let reply = crate::ipc::translation::ParsedMessage {
            header: crate::ipc::translation::CommandHeader { cmd_id: 1, normal_params: 1, translate_params: 0 },
            normal_words: vec![1764],
            descriptors: vec![],
        };

        let replied = ctx.reply_and_receive(server_thread, &[server_session], Some(server_session), Some(reply)).unwrap();
        assert_eq!(replied.delivered.unwrap().message.normal_words, vec![1764]);

        assert_eq!(ctx.thread(client_thread).unwrap().state, ThreadState::Ready);
        assert_eq!(ctx.thread(client_thread).unwrap().registers.r[0], RESULT_SUCCESS.0);
    }

    #[test]
    fn send_sync_request_rejects_mismatched_translate_param_count() {
        let mut ctx = KernelContext::new(KernelConfig::default());
        let pid = ctx.create_process("test");
        let client_thread = ctx.create_thread(pid, "client", 30, 0, 0).unwrap();
        let server_thread = ctx.create_thread(pid, "server", 30, 0, 0).unwrap();

        let (_client_port, server_port) = ctx.create_port("srv:bad", 1).unwrap();
        let client_session = ctx.connect_to_port(client_thread, "srv:bad").unwrap();
        let _server_session = ctx.accept_session(server_port).unwrap();
        let _ = server_thread;

        let request = crate::ipc::translation::ParsedMessage {
            header: crate::ipc::translation::CommandHeader { cmd_id: 1, normal_params: 0, translate_params: 2 },
            normal_words: vec![],
            descriptors: vec![],
        };
        let err = ctx.send_sync_request(client_thread, client_session, request).unwrap_err();
        assert_eq!(err, KernelError::InvalidCombination);
        // The session's pending-request slot must not have been touched.
        assert_eq!(ctx.thread(client_thread).unwrap().state, ThreadState::Ready);
    }

    #[test]
    fn session_closure_reports_to_the_blocked_caller() {
        let mut ctx = KernelContext::new(KernelConfig::default());
        let pid = ctx.create_process("test");
        let client_thread = ctx.create_thread(pid, "client", 30, 0, 0).unwrap();
        ctx.thread_mut(client_thread).unwrap().state = ThreadState::Running;
        ctx.ready_queue.remove(30, client_thread);

        let (_client_port, server_port) = ctx.create_port("srv:test", 1).unwrap();
        let client_session = ctx.connect_to_port(client_thread, "srv:test").unwrap();
        let server_session = ctx.accept_session(server_port).unwrap();

        let request = crate::ipc::translation::ParsedMessage {
            header: crate::ipc::translation::CommandHeader { cmd_id: 1, normal_params: 0, translate_params: 0 },
            normal_words: vec![],
            descriptors: vec![],
        };
        ctx.send_sync_request(client_thread, client_session, request).unwrap();
        assert_eq!(ctx.thread(client_thread).unwrap().state, ThreadState::WaitIpc);

        ctx.close_session_half(server_session, false).unwrap();

        assert_eq!(ctx.thread(client_thread).unwrap().state, ThreadState::Ready);
        assert_eq!(ctx.thread(client_thread).unwrap().registers.r[0], crate::error::ERR_SESSION_CLOSED_BY_REMOTE.0);
    }
}
