/// Interrupt and event dispatcher.
///
/// Every hardware trampoline funnels into `InterruptDispatcher::isr_handler`.
/// Each registered vector carries an optional top half, which runs on every
/// trigger, and an optional bottom half, which is deferred while the
/// dispatcher is locked:
///
///   trigger, depth == 0:  top(); pending = false; lock; bottom(); unlock
///   trigger, depth  > 0:  top(); pending = true
///   unlock, depth 1 -> 0: for each pending vector (table order): bottom()
///
/// Software events live in the same table under `VectorId::Software` and
/// only have a bottom half. New vectors are prepended, so deferred bottom
/// halves run most-recently-registered first.
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use spin::Mutex;

use crate::config::EVENT_VECTOR_BASE;
use crate::platform::CpuInterrupts;


/// Identifies an entry of the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorId {
    /// CPU interrupt vector, installed through the platform.
    Hardware(u32),
    /// Software event number (allocated from `EVENT_VECTOR_BASE`).
    Software(u32),
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorId::Hardware(n) => write!(f, "irq {}", n),
            VectorId::Software(n) => write!(f, "event {}", n),
        }
    }
}

/// Handle to a software event registered with `event_init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u32);

impl EventId {
    pub fn number(&self) -> u32 {
        self.0
    }

    pub fn vector(&self) -> VectorId {
        VectorId::Software(self.0)
    }
}

/// Handler run synchronously on every trigger, even while locked.
pub struct TopHalf(Box<dyn Fn() + Send + Sync>);

impl TopHalf {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }
}

/// Handler deferred until the dispatcher lock is released.
pub struct BottomHalf(Box<dyn FnMut() + Send>);

impl BottomHalf {
    pub fn new(f: impl FnMut() + Send + 'static) -> Self {
        Self(Box::new(f))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrError {
    /// The platform refused to install the vector.
    InstallFailed(u32),
    AlreadyRegistered(VectorId),
    NoMemory,
}

impl fmt::Display for IsrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsrError::InstallFailed(v) => write!(f, "failed to install vector {}", v),
            IsrError::AlreadyRegistered(id) => write!(f, "{} already registered", id),
            IsrError::NoMemory => write!(f, "out of memory for vector table"),
        }
    }
}

struct Vector {
    id: VectorId,
    top: Option<TopHalf>,
    has_bottom: bool,
    bottom: Mutex<Option<BottomHalf>>,
    pending: AtomicBool,
}

impl Vector {
    fn new(id: VectorId, top: Option<TopHalf>, bottom: Option<BottomHalf>) -> Self {
        Self {
            id,
            top,
            has_bottom: bottom.is_some(),
            bottom: Mutex::new(bottom),
            pending: AtomicBool::new(false),
        }
    }

    fn run_top(&self) {
        if let Some(top) = &self.top {
            (top.0)();
        }
    }

    fn run_bottom(&self) {
        if let Some(bottom) = self.bottom.lock().as_mut() {
            (bottom.0)();
        }
    }
}

/// The dispatch table and its nestable lock.
pub struct InterruptDispatcher {
    cpu: Arc<dyn CpuInterrupts>,
    table: Mutex<Vec<Arc<Vector>>>,
    lock_depth: AtomicU32,
    next_event: AtomicU32,
}

impl InterruptDispatcher {
    pub fn new(cpu: Arc<dyn CpuInterrupts>) -> Self {
        Self {
            cpu,
            table: Mutex::new(Vec::new()),
            lock_depth: AtomicU32::new(0),
            next_event: AtomicU32::new(EVENT_VECTOR_BASE),
        }
    }

    /// Run `f` on the table with CPU interrupts masked.
    fn with_table<R>(&self, f: impl FnOnce(&mut Vec<Arc<Vector>>) -> R) -> R {
        let saved = self.cpu.irq_disable();
        let result = f(&mut self.table.lock());
        self.cpu.irq_enable(saved);
        result
    }

    fn find(&self, id: VectorId) -> Option<Arc<Vector>> {
        self.with_table(|table| table.iter().find(|v| v.id == id).cloned())
    }

    fn register(&self, vector: Vector) -> Result<(), IsrError> {
        self.with_table(|table| {
            if table.iter().any(|v| v.id == vector.id) {
                return Err(IsrError::AlreadyRegistered(vector.id));
            }
            table.try_reserve(1).map_err(|_| IsrError::NoMemory)?;
            table.insert(0, Arc::new(vector));
            Ok(())
        })
    }

    /// Register a handler pair and install its hardware vector.
    ///
    /// The table entry is claimed first, so a duplicate or a full table never
    /// reaches the CPU; a failed install gives the entry back.
    pub fn vector_init(
        &self,
        vector: u32,
        priority: u32,
        top: Option<TopHalf>,
        bottom: Option<BottomHalf>,
    ) -> Result<VectorId, IsrError> {
        let id = VectorId::Hardware(vector);
        self.register(Vector::new(id, top, bottom))?;
        if let Err(e) = self.cpu.isr_install(vector, priority) {
            self.with_table(|table| table.retain(|v| v.id != id));
            return Err(e);
        }
        log::debug!(target: "isr", "[isr] {} registered (prio {})", id, priority);
        Ok(id)
    }

    /// Remove a vector from the table. Other vectors keep their pending state.
    pub fn vector_release(&self, id: VectorId) {
        let removed = self.with_table(|table| {
            let before = table.len();
            table.retain(|v| v.id != id);
            before != table.len()
        });
        if removed {
            log::debug!(target: "isr", "[isr] {} released", id);
        }
    }

    /// Common entry point of every hardware trampoline.
    pub fn isr_handler(&self, id: VectorId) {
        let Some(vector) = self.find(id) else {
            log::trace!(target: "isr", "[isr] spurious {}", id);
            return;
        };

        vector.run_top();

        if !vector.has_bottom {
            return;
        }
        if self.is_locked() {
            vector.pending.store(true, Ordering::Release);
        } else {
            vector.pending.store(false, Ordering::Release);
            self.lock();
            vector.run_bottom();
            self.unlock();
        }
    }

    pub fn lock(&self) {
        self.lock_depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Leave one level of the lock; the outermost unlock runs every pending
    /// bottom half before the depth drops to zero.
    pub fn unlock(&self) {
        let depth = self.lock_depth.load(Ordering::Acquire);
        if depth == 0 {
            if cfg!(debug_assertions) {
                panic!("isr unlock without matching lock");
            }
            log::error!(target: "isr", "[isr] unlock without matching lock ignored");
            return;
        }
        if depth == 1 {
            self.run_pending();
        }
        self.lock_depth.fetch_sub(1, Ordering::AcqRel);
    }

    fn run_pending(&self) {
        let snapshot: Vec<Arc<Vector>> = self.with_table(|table| table.clone());
        for vector in snapshot {
            if vector.pending.swap(false, Ordering::AcqRel) {
                vector.run_bottom();
            }
        }
    }

    /// Lock the dispatcher until the returned guard is dropped.
    pub fn critical_section(&self) -> CriticalSection<'_> {
        self.lock();
        CriticalSection { isr: self }
    }

    pub fn lock_depth(&self) -> u32 {
        self.lock_depth.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.lock_depth() > 0
    }

    /// Register a software event. Its handler runs as a bottom half.
    pub fn event_init(&self, handler: BottomHalf) -> Result<EventId, IsrError> {
        let number = self.next_event.fetch_add(1, Ordering::AcqRel);
        let event = EventId(number);
        self.register(Vector::new(event.vector(), None, Some(handler)))?;
        log::debug!(target: "isr", "[isr] event {} registered", number);
        Ok(event)
    }

    /// Mark an event pending. Runs now unless the caller holds the lock.
    pub fn event_raise(&self, event: EventId) {
        self.lock();
        match self.find(event.vector()) {
            Some(vector) => vector.pending.store(true, Ordering::Release),
            None => log::warn!(target: "isr", "[isr] raise of unknown event {}", event.0),
        }
        self.unlock();
    }

    pub fn event_release(&self, event: EventId) {
        self.vector_release(event.vector());
    }

    /// Number of registered vectors and events.
    pub fn registered(&self) -> usize {
        self.with_table(|table| table.len())
    }
}

/// Holds the dispatcher lock; unlocks on drop.
#[must_use = "the dispatcher unlocks as soon as the guard is dropped"]
pub struct CriticalSection<'a> {
    isr: &'a InterruptDispatcher,
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        self.isr.unlock();
    }
}
