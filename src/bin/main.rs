// ptos host demo
//
// A tick thread plays the 10ms timer ISR: it advances the clock, runs
// the timer check, polls the sensor every 250ms and raises the wake
// flag. The main thread is the platform main loop: drain the scheduler,
// sleep until woken.
//
//   blink     etimer every 250ms, exits after BLINKS toggles
//   sensor    poll handler forwards the latest sample to reporter
//   reporter  logs samples, ctimer heartbeat every second, exits when
//             blink does
//
// RUST_LOG=debug shows process lifecycle, RUST_LOG=trace every delivery.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use log::{info, warn};
use static_cell::StaticCell;

use ptos::config::CLOCK_SECOND;
use ptos::kernel::{
    CTimer, Context, Data, DefaultScheduler, ETimer, Event, EventKind, Kernel, Process,
    ProcessId, Pt, PtState, Scheduler, TickCounter, Wake,
};
use ptos::pt_wait_until;

const BLINKS: u32 = 8;
const SAMPLE_EVERY: u32 = 25;

static CLOCK: TickCounter = TickCounter::new();
static WAKE: Wake = Wake::new();
static SCHED: DefaultScheduler<'static> = Scheduler::new(&CLOCK);

// written by the "ADC" side of the tick thread, read in the poll handler
static SAMPLE: AtomicU32 = AtomicU32::new(0);
static STOP: AtomicBool = AtomicBool::new(false);

static BLINK: StaticCell<Blink> = StaticCell::new();
static REPORTER: StaticCell<Reporter> = StaticCell::new();
static SENSOR: StaticCell<Sensor> = StaticCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlinkStep {
    Arm,
    Toggle,
}

struct Blink {
    pt: Pt<BlinkStep>,
    timer: ETimer,
    on: bool,
    toggles: u32,
}

impl Process for Blink {
    fn name(&self) -> &'static str {
        "blink"
    }

    fn init(&mut self) {
        self.pt.init();
        self.on = false;
        self.toggles = 0;
    }

    fn thread(&mut self, cx: &mut Context<'_>, ev: Event) -> PtState {
        self.pt.begin();
        loop {
            match self.pt.point() {
                BlinkStep::Arm => {
                    if let Err(e) = cx.etimer_set(&mut self.timer, CLOCK_SECOND / 4) {
                        warn!("blink: {}", e);
                        return self.pt.exit();
                    }
                    self.pt.set(BlinkStep::Toggle);
                }
                BlinkStep::Toggle => {
                    pt_wait_until!(self.timer.is_for(&ev));
                    self.on = !self.on;
                    self.toggles += 1;
                    info!("led {} ({}/{})", if self.on { "on" } else { "off" }, self.toggles, BLINKS);
                    if self.toggles >= BLINKS {
                        return self.pt.exit();
                    }
                    cx.etimer_reset(self.timer);
                    return PtState::Waiting;
                }
            }
        }
    }

    fn exit_handler(&mut self, _cx: &mut Context<'_>) {
        if self.on {
            info!("led off");
        }
    }
}

struct Sensor {
    reporter: ProcessId,
    blink: ProcessId,
    sample: EventKind,
    dropped: u32,
}

impl Process for Sensor {
    fn name(&self) -> &'static str {
        "sensor"
    }

    fn poll_handler(&mut self, cx: &mut Context<'_>) {
        let value = SAMPLE.load(Ordering::Relaxed);
        if cx
            .post(self.reporter, self.sample, Data::Value(value as usize))
            .is_err()
        {
            self.dropped += 1;
        }
    }

    fn thread(&mut self, _cx: &mut Context<'_>, ev: Event) -> PtState {
        pt_wait_until!(ev.is(EventKind::Exited) && ev.data == Data::Process(self.blink));
        if self.dropped > 0 {
            warn!("sensor: {} samples dropped", self.dropped);
        }
        PtState::Exited
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportStep {
    Start,
    Listen,
}

struct Reporter {
    pt: Pt<ReportStep>,
    blink: ProcessId,
    sample: EventKind,
    heartbeat: CTimer,
    samples: u32,
}

fn heartbeat(cx: &mut Context<'_>, timer: CTimer, _data: Data) {
    info!("t={} {}", cx.now(), SCHED.stats());
    cx.ctimer_reset(timer);
}

impl Process for Reporter {
    fn name(&self) -> &'static str {
        "reporter"
    }

    fn init(&mut self) {
        self.pt.init();
        self.samples = 0;
    }

    fn thread(&mut self, cx: &mut Context<'_>, ev: Event) -> PtState {
        self.pt.begin();
        loop {
            match self.pt.point() {
                ReportStep::Start => {
                    if let Err(e) =
                        cx.ctimer_set(&mut self.heartbeat, CLOCK_SECOND, heartbeat, Data::None)
                    {
                        warn!("reporter: {}", e);
                    }
                    self.pt.set(ReportStep::Listen);
                }
                ReportStep::Listen => {
                    pt_wait_until!(ev.kind == self.sample || ev.is(EventKind::Exited));
                    match ev.data {
                        Data::Value(v) if ev.kind == self.sample => {
                            self.samples += 1;
                            info!("sample #{}: {}", self.samples, v);
                        }
                        Data::Process(pid) if pid == self.blink => {
                            info!("blink finished, {} samples seen", self.samples);
                            return self.pt.exit();
                        }
                        _ => {}
                    }
                    return PtState::Waiting;
                }
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let sample = SCHED.alloc_event().ok_or("event codes exhausted")?;

    let blink = SCHED.register(BLINK.init(Blink {
        pt: Pt::new(BlinkStep::Arm),
        timer: ETimer::new(),
        on: false,
        toggles: 0,
    }))?;
    let reporter = SCHED.register(REPORTER.init(Reporter {
        pt: Pt::new(ReportStep::Start),
        blink,
        sample,
        heartbeat: CTimer::new(),
        samples: 0,
    }))?;
    let sensor = SCHED.register(SENSOR.init(Sensor {
        reporter,
        blink,
        sample,
        dropped: 0,
    }))?;

    SCHED.start(reporter, Data::None)?;
    SCHED.start(sensor, Data::None)?;
    SCHED.start(blink, Data::None)?;

    let ticker = thread::spawn(move || {
        let mut ticks: u32 = 0;
        while !STOP.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(10));
            CLOCK.advance(1);
            SCHED.tick();
            ticks = ticks.wrapping_add(1);
            if ticks % SAMPLE_EVERY == 0 {
                // fake reading that wanders a little
                SAMPLE.store(200 + (ticks / SAMPLE_EVERY) % 17, Ordering::Relaxed);
                SCHED.poll(sensor);
            }
            WAKE.signal();
        }
    });

    while SCHED.processes().next().is_some() {
        while SCHED.run() > 0 {}
        if !WAKE.take() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    STOP.store(true, Ordering::Release);
    if ticker.join().is_err() {
        warn!("tick thread panicked");
    }
    info!("all processes done: {}", SCHED.stats());
    Ok(())
}
