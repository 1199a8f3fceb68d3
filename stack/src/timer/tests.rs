/// Timer wheel tests. The tick vector is driven by hand through the
/// dispatcher, the way the hardware trampoline would.
use super::*;
use crate::platform::mock::{MockCpu, MockTicker};
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex as StdMutex;
use std::string::ToString;
use std::vec;

const VECTOR: u32 = 32;

struct Rig {
    isr: Arc<InterruptDispatcher>,
    wheel: Arc<TimerWheel>,
    ticker: Arc<MockTicker>,
    id: VectorId,
}

impl Rig {
    fn new(period_ms: u32) -> Self {
        let isr = Arc::new(InterruptDispatcher::new(Arc::new(MockCpu::default())));
        let wheel = Arc::new(TimerWheel::new(isr.clone(), period_ms));
        let ticker = Arc::new(MockTicker::new());
        let id = wheel.init(ticker.clone(), VECTOR, 3).unwrap();
        Self { isr, wheel, ticker, id }
    }

    fn tick(&self, n: u32) {
        for _ in 0..n {
            self.isr.isr_handler(self.id);
        }
    }
}

fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    (count, move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

// ---- get_interval ----

#[test]
fn interval_simple() {
    assert_eq!(get_interval(10, 25), 15);
    assert_eq!(get_interval(7, 7), 0);
}

#[test]
fn interval_across_wrap() {
    assert_eq!(get_interval(0xFFFF_FFF0, 5), 21);
    assert_eq!(get_interval(u32::MAX, 0), 1);
}

#[test]
fn interval_is_modular_difference() {
    for &(start, end) in &[(0u32, 0u32), (1, 0), (0x8000_0000, 3), (42, u32::MAX)] {
        let expected = ((end as u64 + (1u64 << 32) - start as u64) % (1u64 << 32)) as u32;
        assert_eq!(get_interval(start, end), expected);
    }
}

// ---- init / release ----

#[test]
fn init_starts_hardware_and_installs_vector() {
    let rig = Rig::new(100);
    assert!(rig.ticker.is_running());
    assert_eq!(rig.ticker.period_ms(), 100);
    assert_eq!(rig.id, VectorId::Hardware(VECTOR));
    assert_eq!(rig.wheel.ticks(), 0);
}

#[test]
fn init_releases_vector_when_hardware_fails() {
    let isr = Arc::new(InterruptDispatcher::new(Arc::new(MockCpu::default())));
    let wheel = Arc::new(TimerWheel::new(isr.clone(), 100));
    let result = wheel.init(Arc::new(MockTicker::failing()), VECTOR, 3);
    assert_eq!(result, Err(TimerError::Hardware));
    assert_eq!(isr.registered(), 0);
}

#[test]
fn init_propagates_install_failure() {
    let isr = Arc::new(InterruptDispatcher::new(Arc::new(MockCpu::new(8))));
    let wheel = Arc::new(TimerWheel::new(isr, 100));
    let ticker = Arc::new(MockTicker::new());
    let result = wheel.init(ticker.clone(), VECTOR, 3);
    assert_eq!(result, Err(TimerError::Isr(IsrError::InstallFailed(VECTOR))));
    assert!(!ticker.is_running());
}

#[test]
fn release_stops_everything() {
    let rig = Rig::new(100);
    let (_count, f) = counter();
    rig.wheel.timer_new(1, f).unwrap();
    rig.wheel.release();
    assert!(!rig.ticker.is_running());
    assert_eq!(rig.isr.registered(), 0);
    assert_eq!(rig.wheel.active(), 0);
}

// ---- registration and firing ----

#[test]
fn zero_period_rejected() {
    let rig = Rig::new(100);
    assert_eq!(rig.wheel.timer_new(0, || {}), Err(TimerError::InvalidPeriod));
}

#[test]
fn first_fire_one_period_after_registration() {
    let rig = Rig::new(100);
    rig.tick(5);
    let (count, f) = counter();
    rig.wheel.timer_new(3, f).unwrap();

    rig.tick(2);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    rig.tick(1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    rig.tick(3);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn locked_dispatcher_delays_but_does_not_skip() {
    let rig = Rig::new(100);
    let (count, f) = counter();
    rig.wheel.timer_new(2, f).unwrap();

    rig.isr.lock();
    rig.tick(5);
    assert_eq!(rig.wheel.ticks(), 5);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    rig.isr.unlock();
    // Late, once; the period restarts from the firing tick.
    assert_eq!(count.load(Ordering::SeqCst), 1);
    rig.tick(1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    rig.tick(1);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn timers_fire_in_list_order() {
    let rig = Rig::new(100);
    let log = Arc::new(StdMutex::new(Vec::new()));
    for tag in ["first", "second", "third"] {
        let log = log.clone();
        rig.wheel
            .timer_new(1, move || log.lock().unwrap().push(tag))
            .unwrap();
    }
    rig.tick(1);
    // Registrations are prepended.
    assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
}

#[test]
fn timer_free_stops_firing() {
    let rig = Rig::new(100);
    let (count, f) = counter();
    let handle = rig.wheel.timer_new(1, f).unwrap();
    rig.tick(1);
    rig.wheel.timer_free(handle);
    rig.tick(3);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(rig.wheel.active(), 0);
}

#[test]
fn handler_may_free_its_own_timer() {
    let rig = Rig::new(100);
    let wheel = Arc::downgrade(&rig.wheel);
    let slot: Arc<StdMutex<Option<TimerHandle>>> = Arc::new(StdMutex::new(None));
    let (count, mut f) = counter();
    let own = slot.clone();
    let handle = rig
        .wheel
        .timer_new(1, move || {
            f();
            if let (Some(wheel), Some(h)) = (wheel.upgrade(), *own.lock().unwrap()) {
                wheel.timer_free(h);
            }
        })
        .unwrap();
    *slot.lock().unwrap() = Some(handle);

    rig.tick(3);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn timer_survives_counter_wrap() {
    let rig = Rig::new(100);
    rig.wheel.ticks.store(u32::MAX - 1, Ordering::SeqCst);
    let (count, f) = counter();
    rig.wheel.timer_new(4, f).unwrap();
    rig.tick(3);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    rig.tick(1);
    assert_eq!(rig.wheel.ticks(), 2);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn tick_while_list_is_held_defers_the_walk() {
    let rig = Arc::new(Rig::new(100));
    let (count, f) = counter();
    rig.wheel.timer_new(1, f).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let worker = rig.clone();
    std::thread::spawn(move || {
        let inside = worker.wheel.with_timers(|timers| {
            worker.tick(1);
            (timers.len(), count.load(Ordering::SeqCst))
        });
        tx.send((inside, count.load(Ordering::SeqCst))).unwrap();
    });

    let ((listed, fired_inside), fired_after) = rx
        .recv_timeout(std::time::Duration::from_secs(2))
        .expect("tick handler blocked on the timer list");
    assert_eq!(listed, 1);
    assert_eq!(fired_inside, 0);
    assert_eq!(fired_after, 1);
    assert_eq!(rig.wheel.ticks(), 1);
    assert_eq!(rig.isr.lock_depth(), 0);
}

#[test]
fn timer_new_from_a_handler_does_not_block() {
    let rig = Rig::new(100);
    let wheel = Arc::downgrade(&rig.wheel);
    let (count, f) = counter();
    let mut f = Some(f);
    rig.wheel
        .timer_new(1, move || {
            if let (Some(wheel), Some(f)) = (wheel.upgrade(), f.take()) {
                wheel.timer_new(1, f).unwrap();
            }
        })
        .unwrap();

    rig.tick(1);
    assert_eq!(rig.wheel.active(), 2);
    rig.tick(1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

// ---- time queries ----

#[test]
fn seconds_and_ms() {
    let rig = Rig::new(100);
    rig.tick(25);
    assert_eq!(rig.wheel.seconds(), 2);
    assert_eq!(rig.wheel.ms(), 2500);
}

#[test]
fn ms_to_ticks_never_zero() {
    let isr = Arc::new(InterruptDispatcher::new(Arc::new(MockCpu::default())));
    let wheel = TimerWheel::new(isr, 100);
    assert_eq!(wheel.ms_to_ticks(1000), 10);
    assert_eq!(wheel.ms_to_ticks(150), 1);
    assert_eq!(wheel.ms_to_ticks(0), 1);
    assert_eq!(wheel.ms_to_ticks(300_000), 3000);
}

#[test]
fn delay_waits_for_ticks() {
    let rig = Arc::new(Rig::new(100));
    let driver = rig.clone();
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let stop_flag = stop.clone();
    let handle = std::thread::spawn(move || {
        while !stop_flag.load(Ordering::SeqCst) {
            driver.tick(1);
            std::thread::yield_now();
        }
    });

    let start = rig.wheel.ticks();
    rig.wheel.delay(5);
    assert!(get_interval(start, rig.wheel.ticks()) >= 5);

    stop.store(true, Ordering::SeqCst);
    handle.join().unwrap();
}

#[test]
fn error_display() {
    assert_eq!(
        TimerError::Isr(IsrError::NoMemory).to_string(),
        "tick vector: out of memory for vector table"
    );
}
