/// Host-side stand-ins for the CPU layer.
///
/// `MockCpu` records installed vectors and checks that interrupt masking is
/// balanced; `MockTicker` records the tick period it was started with. Used
/// by the unit tests and by hosted builds that drive the stack without real
/// hardware.
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use spin::Mutex;

use super::{CpuInterrupts, IrqState, TickHardware};
use crate::isr::IsrError;
use crate::timer::TimerError;

/// Interrupt controller that accepts vectors up to a configurable limit.
pub struct MockCpu {
    max_vector: u32,
    installed: Mutex<Vec<(u32, u32)>>,
    irq_depth: AtomicI32,
}

impl MockCpu {
    /// A controller accepting vectors `0..=max_vector`.
    pub fn new(max_vector: u32) -> Self {
        Self {
            max_vector,
            installed: Mutex::new(Vec::new()),
            irq_depth: AtomicI32::new(0),
        }
    }

    /// `(vector, priority)` pairs installed so far, in installation order.
    pub fn installed(&self) -> Vec<(u32, u32)> {
        self.installed.lock().clone()
    }

    /// Current interrupt-disable nesting (0 when masking is balanced).
    pub fn irq_depth(&self) -> i32 {
        self.irq_depth.load(Ordering::SeqCst)
    }
}

impl Default for MockCpu {
    fn default() -> Self {
        Self::new(255)
    }
}

impl CpuInterrupts for MockCpu {
    fn isr_install(&self, vector: u32, priority: u32) -> Result<(), IsrError> {
        if vector > self.max_vector {
            return Err(IsrError::InstallFailed(vector));
        }
        self.installed.lock().push((vector, priority));
        Ok(())
    }

    fn irq_disable(&self) -> IrqState {
        let prev = self.irq_depth.fetch_add(1, Ordering::SeqCst);
        IrqState(prev as u32)
    }

    fn irq_enable(&self, saved: IrqState) {
        let prev = self.irq_depth.fetch_sub(1, Ordering::SeqCst);
        debug_assert_eq!(prev - 1, saved.0 as i32, "irq_enable out of order");
    }
}

/// Tick source that only remembers its configuration.
pub struct MockTicker {
    period_ms: AtomicU32,
    running: AtomicBool,
    fail_start: AtomicBool,
}

impl MockTicker {
    pub fn new() -> Self {
        Self {
            period_ms: AtomicU32::new(0),
            running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
        }
    }

    /// A ticker whose `start` always fails.
    pub fn failing() -> Self {
        let ticker = Self::new();
        ticker.fail_start.store(true, Ordering::SeqCst);
        ticker
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Period passed to the last successful `start`.
    pub fn period_ms(&self) -> u32 {
        self.period_ms.load(Ordering::SeqCst)
    }
}

impl Default for MockTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl TickHardware for MockTicker {
    fn start(&self, period_ms: u32) -> Result<(), TimerError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TimerError::Hardware);
        }
        self.period_ms.store(period_ms, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
