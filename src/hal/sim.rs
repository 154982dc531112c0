//! Register simulations for the unit tests.

use super::periph::{
    Afio, Edge, Exti, ExtiLine, Gpio, Interrupt, Level, Nvic, Peripheral, Pin, PinMode, Port, Rcc,
};
use super::systick::{csr, SysTickRegisters};
use super::tim::regs::{cr1, egr, sr, Reg, TimerRegisters, REG_COUNT};
use crate::callback::CallbackRegistry;
use crate::Callback;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A callback counting its invocations.
pub(crate) fn counter() -> (Callback, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&hits);
    let callback: Callback = Box::leak(Box::new(move || {
        shared.fetch_add(1, Ordering::SeqCst);
    }));
    (callback, hits)
}

/// One timer. The counter counts up by one on every CNT read while CEN is
/// set, wrapping after ARR.
pub(crate) struct SimTimer {
    regs: [AtomicU16; REG_COUNT],
    writes: AtomicUsize,
    counter_reads: AtomicUsize,
}

pub(crate) fn sim_timers() -> [SimTimer; 4] {
    [SimTimer::new(), SimTimer::new(), SimTimer::new(), SimTimer::new()]
}

impl SimTimer {
    pub fn new() -> Self {
        Self {
            regs: Default::default(),
            writes: AtomicUsize::new(0),
            counter_reads: AtomicUsize::new(0),
        }
    }

    fn cell(&self, reg: Reg) -> &AtomicU16 {
        &self.regs[reg as usize]
    }

    /// Reads without side effects.
    pub fn get(&self, reg: Reg) -> u16 {
        self.cell(reg).load(Ordering::SeqCst)
    }

    /// Writes without side effects and without counting as a driver write.
    pub fn set(&self, reg: Reg, value: u16) {
        self.cell(reg).store(value, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn counter_reads(&self) -> usize {
        self.counter_reads.load(Ordering::SeqCst)
    }

    /// What the hardware does on overflow.
    pub fn raise_update(&self) {
        self.cell(Reg::Sr).fetch_or(sr::UIF, Ordering::SeqCst);
    }
}

impl TimerRegisters for SimTimer {
    fn read(&self, reg: Reg) -> u16 {
        if reg != Reg::Cnt || self.get(Reg::Cr1) & cr1::CEN == 0 {
            return self.get(reg);
        }
        self.counter_reads.fetch_add(1, Ordering::SeqCst);
        let arr = self.get(Reg::Arr);
        let cnt = self.get(Reg::Cnt);
        self.set(Reg::Cnt, if cnt >= arr { 0 } else { cnt + 1 });
        cnt
    }

    fn write(&self, reg: Reg, value: u16) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match reg {
            // rc_w0
            Reg::Sr => {
                self.cell(Reg::Sr).fetch_and(value, Ordering::SeqCst);
            }
            Reg::Egr => {
                if value & egr::UG != 0 {
                    self.set(Reg::Cnt, 0);
                    self.raise_update();
                }
            }
            _ => self.set(reg, value),
        }
    }
}

type Hook = Box<dyn FnMut(u64, bool) + Send>;

/// The SysTick counter.
///
/// In real-time mode every CSR or VAL read while enabled is one counter clock.
/// In fast mode a CSR poll completes the running countdown at once, which
/// keeps multi-second delays cheap. Each 0-to-1 transition of ENABLE records
/// the LOAD value it started with.
pub(crate) struct SimSysTick {
    ctrl: AtomicU32,
    load: AtomicU32,
    val: AtomicU32,
    now: AtomicU64,
    fast: AtomicBool,
    accesses: AtomicUsize,
    segments: Mutex<Vec<u32>>,
    hook: Mutex<Option<Hook>>,
}

impl SimSysTick {
    pub fn new() -> Self {
        Self {
            ctrl: AtomicU32::new(0),
            load: AtomicU32::new(0),
            val: AtomicU32::new(0),
            now: AtomicU64::new(0),
            fast: AtomicBool::new(false),
            accesses: AtomicUsize::new(0),
            segments: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        }
    }

    pub fn fast() -> Self {
        let sim = Self::new();
        sim.fast.store(true, Ordering::SeqCst);
        sim
    }

    /// Runs `hook(now, wrapped)` after every simulated clock. `wrapped` is set
    /// when the counter reached 0 with TICKINT enabled, i.e. when the SysTick
    /// exception would be taken.
    pub fn set_hook(&self, hook: impl FnMut(u64, bool) + Send + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn segments(&self) -> Vec<u32> {
        self.segments.lock().unwrap().clone()
    }

    pub fn accesses(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }

    pub fn raw_ctrl(&self) -> u32 {
        self.ctrl.load(Ordering::SeqCst)
    }

    pub fn raw_load(&self) -> u32 {
        self.load.load(Ordering::SeqCst)
    }

    pub fn raw_val(&self) -> u32 {
        self.val.load(Ordering::SeqCst)
    }

    pub fn force_val(&self, value: u32) {
        self.val.store(value, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.raw_ctrl() & csr::ENABLE != 0
    }

    fn reach_zero(&self) -> bool {
        let ctrl = self.ctrl.fetch_or(csr::COUNTFLAG, Ordering::SeqCst);
        ctrl & csr::TICKINT != 0
    }

    fn clock(&self) {
        if !self.enabled() {
            return;
        }
        let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        let val = self.raw_val();
        let wrapped = if val == 0 {
            self.val.store(self.raw_load(), Ordering::SeqCst);
            false
        } else {
            self.val.store(val - 1, Ordering::SeqCst);
            val == 1 && self.reach_zero()
        };

        let hook = self.hook.lock().unwrap().take();
        if let Some(mut hook) = hook {
            hook(now, wrapped);
            let mut slot = self.hook.lock().unwrap();
            if slot.is_none() {
                *slot = Some(hook);
            }
        }
    }
}

impl SysTickRegisters for SimSysTick {
    fn ctrl(&self) -> u32 {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        if self.fast.load(Ordering::SeqCst) {
            if self.enabled() {
                self.val.store(0, Ordering::SeqCst);
                self.reach_zero();
            }
        } else {
            self.clock();
        }
        self.ctrl.fetch_and(!csr::COUNTFLAG, Ordering::SeqCst)
    }

    fn set_ctrl(&self, value: u32) {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        let old = self.raw_ctrl();
        self.ctrl.store(
            (value & !csr::COUNTFLAG) | (old & csr::COUNTFLAG),
            Ordering::SeqCst,
        );
        if old & csr::ENABLE == 0 && value & csr::ENABLE != 0 {
            self.segments.lock().unwrap().push(self.raw_load());
        }
    }

    fn load(&self) -> u32 {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.raw_load()
    }

    fn set_load(&self, value: u32) {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.load.store(value & 0x00FF_FFFF, Ordering::SeqCst);
    }

    fn val(&self) -> u32 {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        if !self.fast.load(Ordering::SeqCst) {
            self.clock();
        }
        self.raw_val()
    }

    fn set_val(&self, _value: u32) {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.val.store(0, Ordering::SeqCst);
        self.ctrl.fetch_and(!csr::COUNTFLAG, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoardCall {
    PinMode(Port, Pin, PinMode),
    PinValue(Port, Pin, Level),
    ReadPin(Port, Pin),
    Clock(Peripheral),
    Irq(Interrupt),
    ExtiMapping(ExtiLine, Port),
    EnableLine(ExtiLine),
    DisableLine(ExtiLine),
    Trigger(ExtiLine, Edge),
    SetCallback(ExtiLine),
}

/// GPIO, RCC, NVIC, AFIO and EXTI, recording every call.
pub(crate) struct SimBoard {
    calls: Mutex<Vec<BoardCall>>,
    enabled: AtomicU32,
    callbacks: CallbackRegistry<16>,
}

impl SimBoard {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            enabled: AtomicU32::new(0),
            callbacks: CallbackRegistry::new(),
        }
    }

    fn record(&self, call: BoardCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<BoardCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn line_enabled(&self, line: ExtiLine) -> bool {
        self.enabled.load(Ordering::SeqCst) & line.mask() != 0
    }

    /// Delivers an edge on `line` the way the EXTI would: only when unmasked.
    pub fn fire_edge(&self, line: ExtiLine) -> bool {
        self.line_enabled(line) && self.callbacks.invoke(usize::from(line.number()))
    }

    /// Whether the trigger pin has gone high and then low again since the
    /// last `clear_calls`.
    pub fn trigger_pulsed(&self, port: Port, pin: Pin) -> bool {
        let calls = self.calls.lock().unwrap();
        let mut high = false;
        for call in calls.iter() {
            match *call {
                BoardCall::PinValue(p, n, Level::High) if p == port && n == pin => high = true,
                BoardCall::PinValue(p, n, Level::Low) if p == port && n == pin && high => {
                    return true
                }
                _ => {}
            }
        }
        false
    }
}

impl Gpio for SimBoard {
    fn set_pin_mode(&self, port: Port, pin: Pin, mode: PinMode) {
        self.record(BoardCall::PinMode(port, pin, mode));
    }

    fn set_pin_value(&self, port: Port, pin: Pin, level: Level) {
        self.record(BoardCall::PinValue(port, pin, level));
    }

    fn get_pin_value(&self, port: Port, pin: Pin) -> Level {
        self.record(BoardCall::ReadPin(port, pin));
        Level::Low
    }
}

impl Rcc for SimBoard {
    fn enable_peripheral_clock(&self, peripheral: Peripheral) {
        self.record(BoardCall::Clock(peripheral));
    }
}

impl Nvic for SimBoard {
    fn enable_irq(&self, irq: Interrupt) {
        self.record(BoardCall::Irq(irq));
    }
}

impl Afio for SimBoard {
    fn set_exti_port_mapping(&self, line: ExtiLine, port: Port) {
        self.record(BoardCall::ExtiMapping(line, port));
    }
}

impl Exti for SimBoard {
    fn enable_line(&self, line: ExtiLine) {
        self.record(BoardCall::EnableLine(line));
        self.enabled.fetch_or(line.mask(), Ordering::SeqCst);
    }

    fn disable_line(&self, line: ExtiLine) {
        self.record(BoardCall::DisableLine(line));
        self.enabled.fetch_and(!line.mask(), Ordering::SeqCst);
    }

    fn set_trigger_edge(&self, line: ExtiLine, edge: Edge) {
        self.record(BoardCall::Trigger(line, edge));
    }

    fn set_callback(&self, line: ExtiLine, callback: Callback) {
        self.record(BoardCall::SetCallback(line));
        // lines are always below 16
        let _ = self.callbacks.register(usize::from(line.number()), callback);
    }
}
