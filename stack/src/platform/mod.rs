/// CPU services the stack consumes: the interrupt controller and the
/// hardware tick source.
///
/// Each supported board supplies one implementation. The raw interrupt
/// trampoline of that board must call
/// [`InterruptDispatcher::isr_handler`](crate::isr::InterruptDispatcher::isr_handler)
/// with the vector it was installed for.
use crate::isr::IsrError;
use crate::timer::TimerError;

pub mod mock;

/// Saved interrupt mask, returned by `irq_disable` and handed back to
/// `irq_enable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqState(pub u32);

/// Interrupt controller access.
pub trait CpuInterrupts: Send + Sync {
    /// Arm hardware vector `vector` at `priority` so that it reaches the
    /// shared dispatch trampoline.
    fn isr_install(&self, vector: u32, priority: u32) -> Result<(), IsrError>;

    /// Mask interrupts on the current CPU, returning the previous state.
    fn irq_disable(&self) -> IrqState;

    /// Restore the state returned by the matching `irq_disable`.
    fn irq_enable(&self, saved: IrqState);
}

/// The periodic hardware timer that drives the timer wheel.
pub trait TickHardware: Send + Sync {
    /// Start raising the tick interrupt every `period_ms` milliseconds.
    fn start(&self, period_ms: u32) -> Result<(), TimerError>;

    /// Stop the tick interrupt.
    fn stop(&self);
}
