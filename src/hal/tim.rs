//! General-purpose timer driver for TIM1..TIM4.
//!
//! One [`TimerBank`] owns all four timers. Besides plain counter control it
//! offers blocking waits, single-shot and periodic interval callbacks, and PWM
//! output (see [`pwm`]).

pub mod pwm;
pub mod regs;

use self::regs::{cr1, dier, egr, sr, Reg, TimerRegisters};
use crate::callback::CallbackRegistry;
use crate::config;
use crate::time::Hertz;
use crate::{debug, trace, warn, Callback, Error};
use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    Tim1,
    Tim2,
    Tim3,
    Tim4,
}

impl TimerId {
    pub const ALL: [TimerId; config::tim::COUNT] = [Self::Tim1, Self::Tim2, Self::Tim3, Self::Tim4];

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for TimerId {
    type Error = Error;

    fn try_from(ordinal: u8) -> Result<Self, Error> {
        match ordinal {
            0 => Ok(Self::Tim1),
            1 => Ok(Self::Tim2),
            2 => Ok(Self::Tim3),
            3 => Ok(Self::Tim4),
            _ => Err(Error::InvalidTimer(ordinal)),
        }
    }
}

/// Resolution the prescaler is set up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimeUnit {
    /// 1us ticks, for microsecond and millisecond intervals
    Milliseconds,
    /// 1ms ticks, for intervals in seconds
    Seconds,
}

impl TimeUnit {
    const fn tick_hz(self) -> u32 {
        match self {
            Self::Milliseconds => 1_000_000,
            Self::Seconds => 1_000,
        }
    }
}

impl TryFrom<u8> for TimeUnit {
    type Error = Error;

    fn try_from(selector: u8) -> Result<Self, Error> {
        match selector {
            0 => Ok(Self::Milliseconds),
            1 => Ok(Self::Seconds),
            _ => Err(Error::UnsupportedTimeUnit(selector)),
        }
    }
}

/// Timer input clock and the prescaler derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerClock {
    clk: Hertz,
    unit: TimeUnit,
    prescaler: u16,
}

impl TimerClock {
    pub const fn new(clk: Hertz, unit: TimeUnit) -> Result<Self, Error> {
        let hz = clk.to_Hz();
        let tick = unit.tick_hz();
        if hz == 0 || hz % tick != 0 {
            return Err(Error::PrescalerOutOfRange(hz));
        }
        let div = hz / tick;
        if div > u16::MAX as u32 + 1 {
            return Err(Error::PrescalerOutOfRange(hz));
        }
        #[allow(clippy::cast_possible_truncation)]
        let prescaler = (div - 1) as u16;
        Ok(Self {
            clk,
            unit,
            prescaler,
        })
    }

    pub const fn clock(&self) -> Hertz {
        self.clk
    }

    pub const fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub const fn prescaler(&self) -> u16 {
        self.prescaler
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CountDirection {
    Up,
    Down,
    /// Counts up then down, update events at both ends
    CenterAligned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockDivision {
    Div1,
    Div2,
    Div4,
}

impl ClockDivision {
    const fn bits(self) -> u16 {
        match self {
            Self::Div1 => 0b00,
            Self::Div2 => 0b01,
            Self::Div4 => 0b10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerConfig {
    /// Auto-reload value
    pub period: u16,
    pub direction: CountDirection,
    pub clock_division: ClockDivision,
    /// Buffer ARR writes until the next update event
    pub arr_buffer: bool,
    /// Update interrupt
    pub interrupt: bool,
}

impl TimerConfig {
    pub const fn new(period: u16) -> Self {
        Self {
            period,
            direction: CountDirection::Up,
            clock_division: ClockDivision::Div1,
            arr_buffer: false,
            interrupt: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IntervalMode {
    SingleShot,
    Periodic,
}

/// What the update interrupt of a timer will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerState {
    Idle,
    ArmedSingle,
    ArmedPeriodic,
}

impl TimerState {
    const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::ArmedSingle,
            2 => Self::ArmedPeriodic,
            _ => Self::Idle,
        }
    }

    pub const fn mode(self) -> Option<IntervalMode> {
        match self {
            Self::Idle => None,
            Self::ArmedSingle => Some(IntervalMode::SingleShot),
            Self::ArmedPeriodic => Some(IntervalMode::Periodic),
        }
    }
}

pub struct TimerBank<R> {
    regs: [R; config::tim::COUNT],
    clock: TimerClock,
    callbacks: CallbackRegistry<{ config::tim::COUNT }>,
    states: [AtomicU8; config::tim::COUNT],
}

impl<R: TimerRegisters> TimerBank<R> {
    /// `regs` is indexed by [`TimerId`] ordinal.
    pub const fn new(regs: [R; config::tim::COUNT], clock: TimerClock) -> Self {
        Self {
            regs,
            clock,
            callbacks: CallbackRegistry::new(),
            states: [
                AtomicU8::new(TimerState::Idle as u8),
                AtomicU8::new(TimerState::Idle as u8),
                AtomicU8::new(TimerState::Idle as u8),
                AtomicU8::new(TimerState::Idle as u8),
            ],
        }
    }

    pub fn clock(&self) -> &TimerClock {
        &self.clock
    }

    fn regs(&self, id: TimerId) -> &R {
        &self.regs[id.index()]
    }

    /// Programs period, prescaler and control bits. The counter is left stopped.
    pub fn init(&self, id: TimerId, config: &TimerConfig) {
        let tim = self.regs(id);
        tim.clear_bits(Reg::Cr1, cr1::CEN);
        tim.write(Reg::Arr, config.period);
        tim.write(Reg::Psc, self.clock.prescaler());
        tim.modify(Reg::Cr1, |r| {
            let r = r & !(cr1::DIR | cr1::CMS | cr1::CKD | cr1::ARPE);
            let r = r | direction_bits(config.direction);
            let r = r | config.clock_division.bits() << cr1::CKD_SHIFT;
            if config.arr_buffer {
                r | cr1::ARPE
            } else {
                r
            }
        });
        // load the prescaler now rather than at the first overflow
        tim.write(Reg::Egr, egr::UG);
        clear_update_flag(tim);
        if config.interrupt {
            tim.set_bits(Reg::Dier, dier::UIE);
        } else {
            tim.clear_bits(Reg::Dier, dier::UIE);
        }
        debug!("{:?} initialised, period {}", id, config.period);
    }

    pub fn enable(&self, id: TimerId) {
        self.regs(id).set_bits(Reg::Cr1, cr1::CEN);
    }

    /// Stops the counter. An armed interval is disarmed and its callback dropped.
    pub fn disable(&self, id: TimerId) {
        let tim = self.regs(id);
        tim.clear_bits(Reg::Cr1, cr1::CEN);
        let previous = self.set_state(id, TimerState::Idle);
        if previous != TimerState::Idle {
            tim.clear_bits(Reg::Dier, dier::UIE);
            // index is always in range
            let _ = self.callbacks.unregister(id.index());
            debug!("{:?}: {:?} interval disarmed", id, previous);
        }
    }

    pub fn set_prescaler(&self, id: TimerId, prescaler: u16) {
        self.regs(id).write(Reg::Psc, prescaler);
    }

    pub fn set_period(&self, id: TimerId, period: u16) {
        self.regs(id).write(Reg::Arr, period);
    }

    pub fn set_count_direction(&self, id: TimerId, direction: CountDirection) {
        self.regs(id).modify(Reg::Cr1, |r| {
            (r & !(cr1::DIR | cr1::CMS)) | direction_bits(direction)
        });
    }

    pub fn set_clock_division(&self, id: TimerId, division: ClockDivision) {
        self.regs(id).modify(Reg::Cr1, |r| {
            (r & !cr1::CKD) | division.bits() << cr1::CKD_SHIFT
        });
    }

    pub fn set_arr_buffer(&self, id: TimerId, enabled: bool) {
        if enabled {
            self.regs(id).set_bits(Reg::Cr1, cr1::ARPE);
        } else {
            self.regs(id).clear_bits(Reg::Cr1, cr1::ARPE);
        }
    }

    pub fn set_interrupt(&self, id: TimerId, enabled: bool) {
        if enabled {
            self.regs(id).set_bits(Reg::Dier, dier::UIE);
        } else {
            self.regs(id).clear_bits(Reg::Dier, dier::UIE);
        }
    }

    pub fn counter_value(&self, id: TimerId) -> u16 {
        self.regs(id).read(Reg::Cnt)
    }

    /// Ticks left before the next update event.
    ///
    /// An up-counter runs from 0 to ARR, so what is left is `ARR - CNT`; down
    /// and center-aligned counters approach the event from CNT towards 0.
    pub fn remaining_time(&self, id: TimerId, direction: CountDirection) -> u16 {
        let tim = self.regs(id);
        match direction {
            CountDirection::Up => tim.read(Reg::Arr).wrapping_sub(tim.read(Reg::Cnt)),
            CountDirection::Down | CountDirection::CenterAligned => tim.read(Reg::Cnt),
        }
    }

    pub fn state(&self, id: TimerId) -> TimerState {
        TimerState::from_bits(self.states[id.index()].load(Ordering::Acquire))
    }

    pub fn interval_mode(&self, id: TimerId) -> Option<IntervalMode> {
        self.state(id).mode()
    }

    fn set_state(&self, id: TimerId, state: TimerState) -> TimerState {
        TimerState::from_bits(self.states[id.index()].swap(state as u8, Ordering::AcqRel))
    }

    /// Spins until `ticks * scale` counter ticks have passed, then stops the timer.
    pub fn busy_wait(&self, id: TimerId, ticks: u16, scale: u16) -> Result<(), Error> {
        let reload = reload(ticks, scale)?;
        if self.state(id) != TimerState::Idle {
            return Err(Error::TimerBusy(id));
        }

        let tim = self.regs(id);
        tim.write(Reg::Arr, reload);
        tim.clear_bits(Reg::Dier, dier::UIE);
        // latch ARR through the preload register and restart from 0
        tim.write(Reg::Egr, egr::UG);
        clear_update_flag(tim);
        tim.set_bits(Reg::Cr1, cr1::CEN);

        while tim.read(Reg::Cnt) != reload - 1 {}

        tim.write(Reg::Cnt, 0);
        tim.clear_bits(Reg::Cr1, cr1::CEN);
        tim.write(Reg::Arr, 0);
        Ok(())
    }

    /// Calls `callback` once, `ticks * scale` counter ticks from now.
    pub fn set_interval_single(
        &self,
        id: TimerId,
        ticks: u16,
        scale: u16,
        callback: Callback,
    ) -> Result<(), Error> {
        self.arm(id, ticks, scale, callback, TimerState::ArmedSingle)
    }

    /// Calls `callback` every `ticks * scale` counter ticks until cancelled.
    pub fn set_interval_periodic(
        &self,
        id: TimerId,
        ticks: u16,
        scale: u16,
        callback: Callback,
    ) -> Result<(), Error> {
        self.arm(id, ticks, scale, callback, TimerState::ArmedPeriodic)
    }

    fn arm(
        &self,
        id: TimerId,
        ticks: u16,
        scale: u16,
        callback: Callback,
        state: TimerState,
    ) -> Result<(), Error> {
        let reload = reload(ticks, scale)?;
        let tim = self.regs(id);

        tim.clear_bits(Reg::Cr1, cr1::CEN);
        tim.clear_bits(Reg::Dier, dier::UIE);

        self.callbacks.register(id.index(), callback)?;
        let previous = self.set_state(id, state);
        if previous != TimerState::Idle {
            warn!("{:?}: replacing armed interval {:?}", id, previous);
        }

        tim.write(Reg::Arr, 0);
        tim.write(Reg::Arr, reload);
        tim.write(Reg::Egr, egr::UG);
        clear_update_flag(tim);
        tim.set_bits(Reg::Dier, dier::UIE);
        tim.set_bits(Reg::Cr1, cr1::CEN);

        debug!("{:?}: armed {:?}, reload {}", id, state, reload);
        Ok(())
    }

    /// Disarms the interval and stops the timer; same as [`disable`](Self::disable).
    pub fn cancel_interval(&self, id: TimerId) {
        self.disable(id);
    }

    /// Update-interrupt handler for `id`.
    pub fn on_update(&self, id: TimerId) {
        let tim = self.regs(id);
        let state = &self.states[id.index()];

        // a single-shot disarms itself here, so a late second update finds Idle
        let previous = match state.compare_exchange(
            TimerState::ArmedSingle as u8,
            TimerState::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(bits) | Err(bits) => TimerState::from_bits(bits),
        };
        match previous {
            TimerState::ArmedSingle => {
                tim.clear_bits(Reg::Dier, dier::UIE);
                tim.clear_bits(Reg::Cr1, cr1::CEN);
                tim.write(Reg::Arr, 0);
                self.callbacks.invoke(id.index());
            }
            TimerState::ArmedPeriodic => {
                self.callbacks.invoke(id.index());
            }
            TimerState::Idle => {
                trace!("{:?}: update with no interval armed", id);
            }
        }

        clear_update_flag(tim);
    }

    pub fn tim1_up_irq(&self) {
        self.on_update(TimerId::Tim1);
    }

    pub fn tim2_irq(&self) {
        self.on_update(TimerId::Tim2);
    }

    pub fn tim3_irq(&self) {
        self.on_update(TimerId::Tim3);
    }

    pub fn tim4_irq(&self) {
        self.on_update(TimerId::Tim4);
    }
}

fn reload(ticks: u16, scale: u16) -> Result<u16, Error> {
    let product = u32::from(ticks) * u32::from(scale);
    if product == 0 {
        return Err(Error::InvalidPeriod);
    }
    u16::try_from(product).map_err(|_| Error::PeriodOverflow(product))
}

const fn direction_bits(direction: CountDirection) -> u16 {
    match direction {
        CountDirection::Up => 0,
        CountDirection::Down => cr1::DIR,
        CountDirection::CenterAligned => cr1::CMS_CENTER,
    }
}

/// UIF is rc_w0: writing 1 to the other bits leaves them alone.
fn clear_update_flag(tim: &impl TimerRegisters) {
    tim.write(Reg::Sr, !sr::UIF);
}
