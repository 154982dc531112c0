use crate::hal::tim::TimerId;

/// Everything the drivers can refuse.
///
/// Parameter errors are reported before any register is written, so a failed
/// call leaves the hardware exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Timer ordinal outside TIM1..TIM4
    InvalidTimer(u8),
    /// Output-compare channel ordinal outside 1..=4
    InvalidChannel(u8),
    /// Pin number outside 0..=15
    InvalidPin(u8),
    /// Sensor id outside the pool
    InvalidSensor(usize),
    /// Callback slot outside the registry
    InvalidSlot(usize),
    /// Sensor slot has never been initialised
    SensorNotInitialized(usize),
    /// Time-unit selector not recognised
    UnsupportedTimeUnit(u8),
    /// SysTick clock divider other than 1 or 8
    InvalidClockSource(u8),
    /// SysTick counter clock is not a whole number of MHz
    UnsupportedClock(u32),
    /// Timer clock cannot be divided down to the requested tick rate
    PrescalerOutOfRange(u32),
    /// Requested PWM frequency needs a prescaler outside 16 bits
    UnachievableFrequency(u32),
    /// Zero-length timer period
    InvalidPeriod,
    /// `ticks * scale` does not fit the 16-bit auto-reload register
    PeriodOverflow(u32),
    /// Duty cycle above 100 percent
    InvalidDutyCycle(u8),
    /// SysTick reload above 24 bits
    ReloadOutOfRange(u32),
    /// SysTick interval shorter than two ticks or longer than the 24-bit counter
    IntervalOutOfRange(u32),
    /// Timer has an interval armed and cannot be used for a blocking wait
    TimerBusy(TimerId),
    /// SysTick is already owned by a blocking delay or an armed interval
    SysTickBusy,
}
