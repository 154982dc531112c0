//! SysTick as a blocking delay provider and a single interval timer.
//!
//! The core timer is shared by two kinds of users: blocking delays, which
//! poll COUNTFLAG with the tick interrupt masked, and one interrupt-driven
//! interval (single-shot or periodic). Only one of them can own the counter
//! at a time; the loser gets [`Error::SysTickBusy`]. Re-arming an interval
//! over an armed one replaces it.

use crate::config::systick::RELOAD_MAX;
use crate::hal::tim::IntervalMode;
use crate::time::{ExtU32, Hertz, Micros, Millis};
use crate::{debug, trace, warn, Callback, Error};
use core::cell::Cell;
use core::sync::atomic::{AtomicU8, Ordering};
use critical_section::Mutex;
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use num_integer::Integer;

pub mod csr {
    pub const ENABLE: u32 = 1 << 0;
    pub const TICKINT: u32 = 1 << 1;
    /// Set: processor clock, clear: processor clock / 8
    pub const CLKSOURCE: u32 = 1 << 2;
    /// Set when the counter reached 0, cleared by reading CSR
    pub const COUNTFLAG: u32 = 1 << 16;
}

/// Raw access to the SysTick registers.
///
/// Reading `ctrl` clears COUNTFLAG and any write to `val` zeroes the counter,
/// as on the hardware.
pub trait SysTickRegisters: Sync {
    fn ctrl(&self) -> u32;
    fn set_ctrl(&self, value: u32);
    fn load(&self) -> u32;
    fn set_load(&self, value: u32);
    fn val(&self) -> u32;
    fn set_val(&self, value: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// HCLK
    Ahb,
    /// HCLK / 8
    AhbDiv8,
}

impl ClockSource {
    const fn divider(self) -> u32 {
        match self {
            Self::Ahb => 1,
            Self::AhbDiv8 => 8,
        }
    }
}

impl TryFrom<u8> for ClockSource {
    type Error = Error;

    fn try_from(divider: u8) -> Result<Self, Error> {
        match divider {
            1 => Ok(Self::Ahb),
            8 => Ok(Self::AhbDiv8),
            _ => Err(Error::InvalidClockSource(divider)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysTickConfig {
    ahb: Hertz,
    source: ClockSource,
    tick_interrupt: bool,
}

impl SysTickConfig {
    /// The counter clock must be a whole number of MHz so that microseconds
    /// map to whole ticks.
    pub const fn new(ahb: Hertz, source: ClockSource) -> Result<Self, Error> {
        let counter_hz = ahb.to_Hz() / source.divider();
        if counter_hz == 0 || counter_hz % 1_000_000 != 0 {
            return Err(Error::UnsupportedClock(counter_hz));
        }
        Ok(Self {
            ahb,
            source,
            tick_interrupt: true,
        })
    }

    /// Whether `init` leaves the tick interrupt enabled for the free-running counter.
    pub const fn with_tick_interrupt(self, tick_interrupt: bool) -> Self {
        Self {
            tick_interrupt,
            ..self
        }
    }

    pub const fn ahb(&self) -> Hertz {
        self.ahb
    }

    pub const fn source(&self) -> ClockSource {
        self.source
    }

    pub const fn counter_hz(&self) -> u32 {
        self.ahb.to_Hz() / self.source.divider()
    }

    pub const fn ticks_per_us(&self) -> u32 {
        self.counter_hz() / 1_000_000
    }

    const fn clock_bits(&self) -> u32 {
        match self.source {
            ClockSource::Ahb => csr::CLKSOURCE,
            ClockSource::AhbDiv8 => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Usage {
    Idle,
    Delay,
    Single,
    Periodic,
}

impl Usage {
    const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Delay,
            2 => Self::Single,
            3 => Self::Periodic,
            _ => Self::Idle,
        }
    }

    const fn is_interval(self) -> bool {
        matches!(self, Self::Single | Self::Periodic)
    }
}

/// Releases the counter when a blocking delay ends, however it ends.
struct DelayLease<'a>(&'a AtomicU8);

impl Drop for DelayLease<'_> {
    fn drop(&mut self) {
        self.0.store(Usage::Idle as u8, Ordering::Release);
    }
}

pub struct SysTick<R> {
    regs: R,
    config: SysTickConfig,
    usage: AtomicU8,
    callback: Mutex<Cell<Option<Callback>>>,
}

impl<R: SysTickRegisters> SysTick<R> {
    pub const fn new(regs: R, config: SysTickConfig) -> Self {
        Self {
            regs,
            config,
            usage: AtomicU8::new(Usage::Idle as u8),
            callback: Mutex::new(Cell::new(None)),
        }
    }

    pub fn config(&self) -> &SysTickConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn registers(&self) -> &R {
        &self.regs
    }

    fn usage(&self) -> Usage {
        Usage::from_bits(self.usage.load(Ordering::Acquire))
    }

    fn ensure_not_delaying(&self) -> Result<(), Error> {
        if self.usage() == Usage::Delay {
            Err(Error::SysTickBusy)
        } else {
            Ok(())
        }
    }

    /// Drops an armed interval, if any. A running delay keeps its claim.
    fn release_interval(&self) {
        let _ = self
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Usage::from_bits(bits)
                    .is_interval()
                    .then_some(Usage::Idle as u8)
            });
        critical_section::with(|cs| self.callback.borrow(cs).set(None));
    }

    fn control_bits(&self) -> u32 {
        let tickint = if self.config.tick_interrupt {
            csr::TICKINT
        } else {
            0
        };
        self.config.clock_bits() | tickint
    }

    /// Configures clock source and tick interrupt, leaving the counter stopped
    /// and LOAD untouched.
    pub fn init(&self) -> Result<(), Error> {
        self.ensure_not_delaying()?;
        self.regs.set_ctrl(self.control_bits());
        debug!("SysTick at {} Hz", self.config.counter_hz());
        Ok(())
    }

    /// Like [`init`](Self::init), also programming the reload value.
    pub fn init_with_reload(&self, reload: u32) -> Result<(), Error> {
        check_reload(reload)?;
        self.init()?;
        self.regs.set_load(reload);
        Ok(())
    }

    pub fn set_reload_value(&self, reload: u32) -> Result<(), Error> {
        check_reload(reload)?;
        self.ensure_not_delaying()?;
        self.regs.set_load(reload);
        Ok(())
    }

    pub fn start(&self) -> Result<(), Error> {
        self.ensure_not_delaying()?;
        self.regs.set_ctrl(self.regs.ctrl() | csr::ENABLE);
        Ok(())
    }

    /// Stops the counter. An armed interval is dropped.
    pub fn stop(&self) -> Result<(), Error> {
        self.ensure_not_delaying()?;
        self.regs.set_ctrl(self.regs.ctrl() & !csr::ENABLE);
        self.release_interval();
        Ok(())
    }

    /// Stops the counter and zeroes LOAD, VAL and COUNTFLAG. An armed interval is dropped.
    pub fn reset(&self) -> Result<(), Error> {
        self.ensure_not_delaying()?;
        self.clear_counter();
        self.release_interval();
        Ok(())
    }

    fn clear_counter(&self) {
        self.regs.set_ctrl(self.regs.ctrl() & !csr::ENABLE);
        self.regs.set_load(0);
        self.regs.set_val(0);
        // COUNTFLAG clears on read
        let _ = self.regs.ctrl();
    }

    /// Zeroes VAL so the running countdown starts over from LOAD. An armed
    /// interval stays armed.
    pub fn restart_count(&self) -> Result<(), Error> {
        self.ensure_not_delaying()?;
        self.regs.set_val(0);
        Ok(())
    }

    pub fn remaining_counts(&self) -> u32 {
        self.regs.val()
    }

    pub fn elapsed_counts(&self) -> u32 {
        let load = self.regs.load();
        load.saturating_sub(self.regs.val())
    }

    pub fn ticks_for_micros(&self, us: u32) -> u64 {
        u64::from(us) * u64::from(self.config.ticks_per_us())
    }

    pub fn ticks_to_micros(&self, ticks: u32) -> u32 {
        ticks / self.config.ticks_per_us()
    }

    /// Longest interval the 24-bit counter can time.
    pub fn max_interval(&self) -> Micros {
        (RELOAD_MAX / self.config.ticks_per_us()).micros()
    }

    pub fn delay_us_blocking(&self, us: Micros) -> Result<(), Error> {
        self.spin(self.ticks_for_micros(us.ticks()))
    }

    pub fn delay_ms_blocking(&self, ms: Millis) -> Result<(), Error> {
        self.spin(u64::from(ms.ticks()) * 1000 * u64::from(self.config.ticks_per_us()))
    }

    /// Counts down `ticks` in segments of at most [`RELOAD_MAX`]: the
    /// remainder first, then the full-range segments.
    fn spin(&self, ticks: u64) -> Result<(), Error> {
        self.usage
            .compare_exchange(
                Usage::Idle as u8,
                Usage::Delay as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::SysTickBusy)?;
        let _lease = DelayLease(&self.usage);

        if ticks == 0 {
            return Ok(());
        }

        let (full, rest) = ticks.div_rem(&u64::from(RELOAD_MAX));
        trace!("SysTick delay: {} ticks, {} full segments", ticks, full);

        let clock = self.config.clock_bits();
        self.regs.set_ctrl(clock);
        if rest != 0 {
            // rest < RELOAD_MAX
            self.count_down(u32::try_from(rest).unwrap_or(RELOAD_MAX), clock);
        }
        for _ in 0..full {
            self.count_down(RELOAD_MAX, clock);
        }
        self.clear_counter();
        Ok(())
    }

    fn count_down(&self, ticks: u32, clock: u32) {
        self.regs.set_load(ticks);
        self.regs.set_val(0);
        self.regs.set_ctrl(clock | csr::ENABLE);
        while self.regs.ctrl() & csr::COUNTFLAG == 0 {}
        self.regs.set_ctrl(clock);
    }

    /// Calls `callback` once, `interval` from now. Single-shot and periodic
    /// intervals count the same number of ticks to their first call.
    pub fn set_interval_single(&self, interval: Micros, callback: Callback) -> Result<(), Error> {
        self.arm(interval, callback, Usage::Single)
    }

    /// Calls `callback` every `interval` until stopped.
    pub fn set_interval_periodic(&self, interval: Micros, callback: Callback) -> Result<(), Error> {
        self.arm(interval, callback, Usage::Periodic)
    }

    fn arm(&self, interval: Micros, callback: Callback, usage: Usage) -> Result<(), Error> {
        let ticks = self.ticks_for_micros(interval.ticks());
        let ticks = match u32::try_from(ticks) {
            Ok(ticks) if (2..=RELOAD_MAX).contains(&ticks) => ticks,
            _ => return Err(Error::IntervalOutOfRange(interval.ticks())),
        };
        // a reload of N-1 fires after N ticks
        let reload = ticks - 1;

        critical_section::with(|cs| -> Result<(), Error> {
            let previous = self
                .usage
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                    (Usage::from_bits(bits) != Usage::Delay).then_some(usage as u8)
                })
                .map(Usage::from_bits)
                .map_err(|_| Error::SysTickBusy)?;
            if previous.is_interval() {
                warn!("SysTick: {:?} interval replaced by {:?}", previous, usage);
            }

            self.regs.set_ctrl(self.config.clock_bits());
            self.callback.borrow(cs).set(Some(callback));
            self.regs.set_load(reload);
            self.regs.set_val(0);
            self.regs
                .set_ctrl(self.config.clock_bits() | csr::TICKINT | csr::ENABLE);
            Ok(())
        })?;

        debug!("SysTick: {:?} interval of {} ticks", usage, ticks);
        Ok(())
    }

    pub fn interval_mode(&self) -> Option<IntervalMode> {
        match self.usage() {
            Usage::Single => Some(IntervalMode::SingleShot),
            Usage::Periodic => Some(IntervalMode::Periodic),
            Usage::Idle | Usage::Delay => None,
        }
    }

    /// Whether a delay or an interval currently owns the counter.
    pub fn is_busy(&self) -> bool {
        self.usage() != Usage::Idle
    }

    /// SysTick exception handler.
    pub fn on_interrupt(&self) {
        let callback = critical_section::with(|cs| match self.usage() {
            Usage::Single => {
                self.usage.store(Usage::Idle as u8, Ordering::Release);
                self.regs
                    .set_ctrl(self.regs.ctrl() & !(csr::TICKINT | csr::ENABLE));
                self.regs.set_load(0);
                self.regs.set_val(0);
                self.callback.borrow(cs).take()
            }
            Usage::Periodic => self.callback.borrow(cs).get(),
            Usage::Idle | Usage::Delay => None,
        });

        match callback {
            Some(callback) => callback.call(),
            None => trace!("SysTick: tick with no interval armed"),
        }

        // COUNTFLAG clears on read
        let _ = self.regs.ctrl();
    }
}

fn check_reload(reload: u32) -> Result<(), Error> {
    if reload > RELOAD_MAX {
        Err(Error::ReloadOutOfRange(reload))
    } else {
        Ok(())
    }
}

/// The `embedded-hal` delays cannot report errors: while an interval owns
/// SysTick they log a warning and return at once without delaying. Use
/// [`SysTick::delay_us_blocking`] to see the refusal.
impl<R: SysTickRegisters> DelayUs<u32> for &SysTick<R> {
    fn delay_us(&mut self, us: u32) {
        if let Err(e) = self.delay_us_blocking(us.micros()) {
            warn!("delay of {} us skipped: {:?}", us, e);
        }
    }
}

impl<R: SysTickRegisters> DelayUs<u16> for &SysTick<R> {
    fn delay_us(&mut self, us: u16) {
        self.delay_us(u32::from(us));
    }
}

/// Like the `DelayUs` impl, returns without delaying while an interval owns
/// SysTick.
impl<R: SysTickRegisters> DelayMs<u32> for &SysTick<R> {
    fn delay_ms(&mut self, ms: u32) {
        if let Err(e) = self.delay_ms_blocking(ms.millis()) {
            warn!("delay of {} ms skipped: {:?}", ms, e);
        }
    }
}

impl<R: SysTickRegisters> DelayMs<u16> for &SysTick<R> {
    fn delay_ms(&mut self, ms: u16) {
        self.delay_ms(u32::from(ms));
    }
}
