//! Stack configuration: compile-time limits and runtime tick settings.
//!
//! The table sizes and protocol timeouts are fixed at build time: the stack
//! never grows its tables. Only the hardware tick parameters are chosen at
//! runtime, through `StackConfig`.

/// Number of entries in each interface's ARP cache.
pub const ARP_TABLE_SIZE: usize = 10;

/// Period of the ARP cache sweep (5 minutes).
pub const ARP_TIMER_PERIOD_MS: u32 = 5 * 60 * 1000;

/// Lifetime of an ARP entry since its last refresh (20 minutes).
pub const ARP_ENTRY_TIMEOUT_MS: u32 = 20 * 60 * 1000;

/// Minimum interval between two ARP requests for the same pending address.
pub const ARP_REQUEST_RETRY_MS: u32 = 1000;

/// Period of the Ethernet link watcher.
pub const ETH_LINK_POLL_MS: u32 = 4000;

/// First vector number handed out to software events.
///
/// Hardware vectors on every supported CPU are below this value, so event
/// numbers never collide with them in logs.
pub const EVENT_VECTOR_BASE: u32 = 500;

/// Default hardware tick period.
pub const TIMER_PERIOD_MS: u32 = 100;

/// Default vector number of the hardware tick interrupt.
pub const TIMER_VECTOR: u32 = 32;

/// Default priority of the hardware tick interrupt.
pub const TIMER_PRIORITY: u32 = 3;

/// Default number of packet buffers in an interface pool.
pub const NETBUF_POOL_CAPACITY: usize = 32;

static_assertions::const_assert!(ARP_TABLE_SIZE > 0);
static_assertions::const_assert!(TIMER_PERIOD_MS > 0 && TIMER_PERIOD_MS <= 1000);
static_assertions::const_assert!(ARP_ENTRY_TIMEOUT_MS > ARP_TIMER_PERIOD_MS);
static_assertions::const_assert!(TIMER_VECTOR < EVENT_VECTOR_BASE);

/// Runtime parameters of the stack's hardware tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// Hardware tick period in milliseconds.
    pub timer_period_ms: u32,
    /// Vector number the tick interrupt is installed on.
    pub timer_vector: u32,
    /// Interrupt priority passed to the CPU layer.
    pub timer_priority: u32,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            timer_period_ms: TIMER_PERIOD_MS,
            timer_vector: TIMER_VECTOR,
            timer_priority: TIMER_PRIORITY,
        }
    }
}
