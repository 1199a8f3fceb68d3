/// Software timer wheel.
///
/// A single hardware tick drives every protocol timer. The tick's top half
/// only bumps the counter; its bottom half walks the registration list and
/// fires every timer whose period has elapsed since it last fired. Timers can
/// fire late (a locked dispatcher delays the walk), never early.
///
/// The registration list is only touched with the dispatcher locked, so a
/// tick landing in the middle of `timer_new` defers its walk instead of
/// spinning on the list.
///
/// All interval arithmetic is wraparound-safe: the counter is a u32 and is
/// expected to wrap on long-running systems.
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use crate::isr::{BottomHalf, InterruptDispatcher, IsrError, TopHalf, VectorId};
use crate::platform::TickHardware;

#[cfg(test)]
mod tests;

/// Ticks elapsed from `start` to `end`, modulo 2^32.
#[inline]
pub fn get_interval(start: u32, end: u32) -> u32 {
    end.wrapping_sub(start)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Period of zero ticks.
    InvalidPeriod,
    NoMemory,
    /// The hardware tick source could not be configured.
    Hardware,
    Isr(IsrError),
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::InvalidPeriod => write!(f, "timer period must be at least one tick"),
            TimerError::NoMemory => write!(f, "out of memory for timer list"),
            TimerError::Hardware => write!(f, "hardware tick source failed"),
            TimerError::Isr(e) => write!(f, "tick vector: {}", e),
        }
    }
}

impl From<IsrError> for TimerError {
    fn from(e: IsrError) -> Self {
        TimerError::Isr(e)
    }
}

/// Handle returned by `timer_new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u32);

struct TimerEntry {
    id: TimerHandle,
    period: u32,
    last_fired: AtomicU32,
    handler: Mutex<Box<dyn FnMut() + Send>>,
}

pub struct TimerWheel {
    isr: Arc<InterruptDispatcher>,
    ticks: AtomicU32,
    period_ms: u32,
    timers: Mutex<Vec<Arc<TimerEntry>>>,
    next_id: AtomicU32,
    hw: Mutex<Option<(Arc<dyn TickHardware>, VectorId)>>,
}

impl TimerWheel {
    /// A stopped wheel whose tick lasts `period_ms` milliseconds.
    pub fn new(isr: Arc<InterruptDispatcher>, period_ms: u32) -> Self {
        Self {
            isr,
            ticks: AtomicU32::new(0),
            period_ms: period_ms.max(1),
            timers: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            hw: Mutex::new(None),
        }
    }

    /// Reset the counter, hook the tick vector and start the hardware.
    pub fn init(
        self: &Arc<Self>,
        hw: Arc<dyn TickHardware>,
        vector: u32,
        priority: u32,
    ) -> Result<VectorId, TimerError> {
        self.ticks.store(0, Ordering::Release);

        let top_wheel = Arc::clone(self);
        let bottom_wheel = Arc::clone(self);
        let id = self.isr.vector_init(
            vector,
            priority,
            Some(TopHalf::new(move || top_wheel.tick())),
            Some(BottomHalf::new(move || bottom_wheel.poll())),
        )?;

        if let Err(e) = hw.start(self.period_ms) {
            log::warn!(target: "timer", "[timer] tick source failed: {}", e);
            self.isr.vector_release(id);
            return Err(e);
        }

        *self.hw.lock() = Some((hw, id));
        log::info!(target: "timer", "[timer] {} ms tick on {}", self.period_ms, id);
        Ok(id)
    }

    /// Stop the tick, drop the vector and every registration.
    pub fn release(&self) {
        if let Some((hw, id)) = self.hw.lock().take() {
            hw.stop();
            self.isr.vector_release(id);
        }
        self.with_timers(|timers| timers.clear());
        log::debug!(target: "timer", "[timer] released");
    }

    /// Run `f` on the registration list inside a dispatcher critical section.
    fn with_timers<R>(&self, f: impl FnOnce(&mut Vec<Arc<TimerEntry>>) -> R) -> R {
        let cs = self.isr.critical_section();
        let result = f(&mut self.timers.lock());
        drop(cs);
        result
    }

    /// Tick top half: advance the counter.
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::AcqRel);
    }

    /// Tick bottom half: fire every due timer, in list order.
    pub fn poll(&self) {
        let snapshot = self.with_timers(|timers| timers.clone());
        for timer in snapshot {
            let now = self.ticks();
            let last = timer.last_fired.load(Ordering::Acquire);
            if get_interval(last, now) >= timer.period {
                timer.last_fired.store(now, Ordering::Release);
                let mut handler = timer.handler.lock();
                (*handler)();
            }
        }
    }

    /// Register `handler` to run every `period_ticks` ticks, first one full
    /// period from now.
    pub fn timer_new(
        &self,
        period_ticks: u32,
        handler: impl FnMut() + Send + 'static,
    ) -> Result<TimerHandle, TimerError> {
        if period_ticks == 0 {
            return Err(TimerError::InvalidPeriod);
        }
        let id = TimerHandle(self.next_id.fetch_add(1, Ordering::AcqRel));
        let entry = Arc::new(TimerEntry {
            id,
            period: period_ticks,
            last_fired: AtomicU32::new(self.ticks()),
            handler: Mutex::new(Box::new(handler)),
        });

        self.with_timers(|timers| {
            timers.try_reserve(1).map_err(|_| TimerError::NoMemory)?;
            timers.insert(0, entry);
            Ok::<(), TimerError>(())
        })?;
        log::trace!(target: "timer", "[timer] #{} every {} ticks", id.0, period_ticks);
        Ok(id)
    }

    /// Remove a registration. Unknown handles are ignored.
    pub fn timer_free(&self, handle: TimerHandle) {
        self.with_timers(|timers| timers.retain(|t| t.id != handle));
    }

    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn seconds(&self) -> u32 {
        self.ticks() / self.ticks_per_second()
    }

    /// Milliseconds since init, wrapping with the tick counter.
    pub fn ms(&self) -> u32 {
        self.ticks().wrapping_mul(self.period_ms)
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    fn ticks_per_second(&self) -> u32 {
        (1000 / self.period_ms).max(1)
    }

    /// Convert a duration to ticks, rounding down but never below one tick.
    pub fn ms_to_ticks(&self, ms: u32) -> u32 {
        (ms / self.period_ms).max(1)
    }

    /// Busy-wait for `delay_ticks` ticks.
    ///
    /// Spins on the counter without yielding, so it needs the tick interrupt
    /// to keep running. Never call it from a top half.
    pub fn delay(&self, delay_ticks: u32) {
        let start = self.ticks();
        while get_interval(start, self.ticks()) < delay_ticks {
            core::hint::spin_loop();
        }
    }

    pub fn active(&self) -> usize {
        self.with_timers(|timers| timers.len())
    }
}
