/// Stack context: one interrupt dispatcher and one timer wheel.
///
/// Interfaces get a clone of `Stack` at construction instead of reaching
/// for globals.
use alloc::sync::Arc;

use crate::config::StackConfig;
use crate::isr::{InterruptDispatcher, VectorId};
use crate::net::NetError;
use crate::platform::{CpuInterrupts, TickHardware};
use crate::timer::TimerWheel;

#[derive(Clone)]
pub struct Stack {
    isr: Arc<InterruptDispatcher>,
    timers: Arc<TimerWheel>,
    timer_vector: VectorId,
}

impl Stack {
    /// Bring up the dispatcher and start the hardware tick.
    pub fn init(
        cpu: Arc<dyn CpuInterrupts>,
        tick: Arc<dyn TickHardware>,
        config: &StackConfig,
    ) -> Result<Self, NetError> {
        let isr = Arc::new(InterruptDispatcher::new(cpu));
        let timers = Arc::new(TimerWheel::new(isr.clone(), config.timer_period_ms));
        let timer_vector = timers.init(tick, config.timer_vector, config.timer_priority)?;
        log::info!(target: "stack", "[stack] up, {} ms tick", config.timer_period_ms);
        Ok(Self {
            isr,
            timers,
            timer_vector,
        })
    }

    /// Stop the tick and drop every timer. Interfaces must be released first.
    pub fn release(&self) {
        self.timers.release();
        log::info!(target: "stack", "[stack] released");
    }

    pub fn isr(&self) -> &InterruptDispatcher {
        &self.isr
    }

    pub fn timers(&self) -> &TimerWheel {
        &self.timers
    }

    /// Vector the tick interrupt is delivered on.
    pub fn timer_vector(&self) -> VectorId {
        self.timer_vector
    }
}
