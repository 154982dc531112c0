//! HC-SR04 style ultrasonic ranging.
//!
//! A 10us pulse on the trigger pin makes the sensor emit a burst; the echo pin
//! then stays high for the round-trip time of the sound. Both echo edges
//! arrive through EXTI and the pulse is timed on SysTick:
//!
//! ```text
//! trigger  __|‾‾‾‾|_______________________________
//! echo     _______________|‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾|______
//!                         ^ restart count  ^ elapsed -> cm
//! ```
//!
//! Only one measurement runs at a time; the sensors of a pool share the
//! session state and the SysTick window.

use crate::config::ultrasonic::{
    CM_PER_ECHO_US, TIMEOUT_US_PER_CM, TRIGGER_PULSE_US, TRIGGER_SETTLE_US,
};
use crate::config;
use crate::hal::periph::{Board, Edge, ExtiLine, Interrupt, Level, Peripheral, Pin, PinMode, Port};
use crate::hal::systick::{SysTick, SysTickRegisters};
use crate::time::{ExtU32, Micros};
use crate::{debug, info, trace, warn, Callable, Error};
use core::cell::Cell;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use critical_section::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorState {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UltrasonicConfig {
    pub echo_port: Port,
    pub echo_pin: Pin,
    pub trigger_port: Port,
    pub trigger_pin: Pin,
    pub range_cm: u16,
    pub state: SensorState,
}

/// Outcome of one measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reading {
    Distance(f32),
    /// No echo, or an echo longer than the configured range
    OutOfRange,
    /// The sensor is switched off; nothing was measured
    Disabled,
}

impl Reading {
    pub const OUT_OF_RANGE_CM: f32 = -1.0;
    pub const DISABLED_CM: f32 = -2.0;

    /// Flattens the reading to centimetres, with negative sentinels for the
    /// two non-distance outcomes.
    pub fn to_cm(self) -> f32 {
        match self {
            Self::Distance(cm) => cm,
            Self::OutOfRange => Self::OUT_OF_RANGE_CM,
            Self::Disabled => Self::DISABLED_CM,
        }
    }
}

/// Echo time, in microseconds, of an object `range_cm` away.
pub fn timeout_for_range(range_cm: u16) -> u32 {
    round(f32::from(range_cm) * TIMEOUT_US_PER_CM + 0.5)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round(x: f32) -> u32 {
    (x + 0.5) as u32
}

#[allow(clippy::cast_precision_loss)]
fn echo_to_cm(us: u32) -> f32 {
    us as f32 * CM_PER_ECHO_US
}

#[derive(Debug, Clone, Copy)]
struct Sensor {
    config: UltrasonicConfig,
    timeout_us: u32,
}

impl Sensor {
    fn new(config: UltrasonicConfig) -> Self {
        Self {
            config,
            timeout_us: timeout_for_range(config.range_cm),
        }
    }

    fn echo_line(&self) -> ExtiLine {
        self.config.echo_pin.exti_line()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeasurementState {
    Idle,
    WaitingForRisingEdge,
    WaitingForFallingEdge,
    Done,
}

impl MeasurementState {
    const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::WaitingForRisingEdge,
            2 => Self::WaitingForFallingEdge,
            3 => Self::Done,
            _ => Self::Idle,
        }
    }
}

/// State shared between the measuring loop and the echo interrupt.
struct EchoSession {
    state: AtomicU8,
    /// `f32` bits
    distance: AtomicU32,
    window_us: AtomicU32,
}

impl EchoSession {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(MeasurementState::Idle as u8),
            distance: AtomicU32::new(0),
            window_us: AtomicU32::new(0),
        }
    }

    fn state(&self) -> MeasurementState {
        MeasurementState::from_bits(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: MeasurementState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn begin(&self, window: Micros) {
        self.distance.store(0, Ordering::Relaxed);
        self.window_us.store(window.ticks(), Ordering::Relaxed);
        self.set_state(MeasurementState::WaitingForRisingEdge);
    }

    fn finish(&self, cm: f32) {
        self.distance.store(cm.to_bits(), Ordering::Relaxed);
        self.set_state(MeasurementState::Done);
    }

    fn distance(&self) -> f32 {
        f32::from_bits(self.distance.load(Ordering::Relaxed))
    }

    fn window(&self) -> Micros {
        self.window_us.load(Ordering::Relaxed).micros()
    }
}

fn window_elapsed() {
    trace!("echo window elapsed");
}

pub struct UltrasonicPool<'a, B, S, const N: usize = { config::ultrasonic::SENSORS }> {
    board: &'a B,
    systick: &'a SysTick<S>,
    sensors: Mutex<Cell<[Option<Sensor>; N]>>,
    session: EchoSession,
}

impl<B: Board + 'static, S: SysTickRegisters + 'static, const N: usize>
    UltrasonicPool<'static, B, S, N>
{
    /// Wires up sensor `id` and registers the pool as the handler of its echo line.
    pub fn init(&'static self, id: usize, config: &UltrasonicConfig) -> Result<(), Error> {
        check_id::<N>(id)?;
        let sensor = Sensor::new(*config);
        let line = sensor.echo_line();
        let board = self.board;

        // the only fallible step, done before any pin or line is touched
        self.systick.init()?;

        board.enable_peripheral_clock(Peripheral::Gpio(config.echo_port));
        board.enable_peripheral_clock(Peripheral::Gpio(config.trigger_port));
        board.enable_peripheral_clock(Peripheral::Afio);

        board.set_pin_mode(config.echo_port, config.echo_pin, PinMode::InputFloating);
        board.set_pin_mode(config.trigger_port, config.trigger_pin, PinMode::OutputPushPull);

        board.set_exti_port_mapping(line, config.echo_port);
        board.enable_irq(Interrupt::for_exti_line(line));
        board.set_callback(line, self);
        board.enable_line(line);
        board.set_trigger_edge(line, Edge::Both);

        self.store(id, sensor);

        info!(
            "sensor {}: echo {:?}{}, trigger {:?}{}, timeout {} us",
            id,
            config.echo_port,
            config.echo_pin.number(),
            config.trigger_port,
            config.trigger_pin.number(),
            sensor.timeout_us,
        );
        Ok(())
    }
}

impl<'a, B: Board, S: SysTickRegisters, const N: usize> UltrasonicPool<'a, B, S, N> {
    pub const fn new(board: &'a B, systick: &'a SysTick<S>) -> Self {
        Self {
            board,
            systick,
            sensors: Mutex::new(Cell::new([None; N])),
            session: EchoSession::new(),
        }
    }

    fn sensor(&self, id: usize) -> Result<Sensor, Error> {
        check_id::<N>(id)?;
        critical_section::with(|cs| self.sensors.borrow(cs).get()[id])
            .ok_or(Error::SensorNotInitialized(id))
    }

    fn store(&self, id: usize, sensor: Sensor) {
        critical_section::with(|cs| {
            let cell = self.sensors.borrow(cs);
            let mut sensors = cell.get();
            sensors[id] = Some(sensor);
            cell.set(sensors);
        });
    }

    /// Changes the range of sensor `id`; the timeout follows.
    pub fn set_range(&self, id: usize, range_cm: u16) -> Result<(), Error> {
        let sensor = self.sensor(id)?;
        self.store(
            id,
            Sensor::new(UltrasonicConfig {
                range_cm,
                ..sensor.config
            }),
        );
        Ok(())
    }

    pub fn set_state(&self, id: usize, state: SensorState) -> Result<(), Error> {
        let mut sensor = self.sensor(id)?;
        sensor.config.state = state;
        self.store(id, sensor);
        debug!("sensor {}: {:?}", id, state);
        Ok(())
    }

    /// Echo timeout of sensor `id`, in microseconds.
    pub fn timeout(&self, id: usize) -> Result<u32, Error> {
        self.sensor(id).map(|s| s.timeout_us)
    }

    pub fn session_state(&self) -> MeasurementState {
        self.session.state()
    }

    /// Triggers sensor `id` and blocks until the echo has been timed or has
    /// taken longer than the sensor's range allows.
    pub fn read_distance(&self, id: usize) -> Result<Reading, Error> {
        let sensor = self.sensor(id)?;
        if sensor.config.state == SensorState::Disabled {
            return Ok(Reading::Disabled);
        }

        let result = self.measure(&sensor);
        if result.is_err() {
            // SysTick belongs to someone else; leave it alone
            self.release_line(&sensor);
        }
        result
    }

    fn measure(&self, sensor: &Sensor) -> Result<Reading, Error> {
        let line = sensor.echo_line();
        let (port, pin) = (sensor.config.trigger_port, sensor.config.trigger_pin);

        self.session.begin(self.window(sensor));
        self.board.set_trigger_edge(line, Edge::Both);
        self.board.enable_line(line);

        self.board.set_pin_value(port, pin, Level::Low);
        self.systick.delay_us_blocking(TRIGGER_SETTLE_US.micros())?;
        self.board.set_pin_value(port, pin, Level::High);
        self.systick.delay_us_blocking(TRIGGER_PULSE_US.micros())?;
        self.board.set_pin_value(port, pin, Level::Low);

        // the window lapses `timeout` after the trigger if the echo never rises
        critical_section::with(|_| {
            if self.session.state() == MeasurementState::WaitingForRisingEdge {
                self.systick
                    .set_interval_single(self.session.window(), &window_elapsed)
            } else {
                Ok(())
            }
        })?;

        loop {
            let state = self.session.state();
            if state == MeasurementState::Done {
                return Ok(Reading::Distance(self.session.distance()));
            }

            let elapsed_us = self.systick.ticks_to_micros(self.systick.elapsed_counts());
            let lapsed = self.systick.interval_mode().is_none();
            let late = elapsed_us > sensor.timeout_us;
            if lapsed || late {
                // the falling edge may have landed since the check above
                if self.session.state() == MeasurementState::Done {
                    return Ok(Reading::Distance(self.session.distance()));
                }
                debug!("echo timed out ({:?})", state);
                self.abandon(sensor);
                return Ok(Reading::OutOfRange);
            }
        }
    }

    fn abandon(&self, sensor: &Sensor) {
        self.release_line(sensor);
        if let Err(e) = self.systick.stop() {
            warn!("echo: SysTick not stopped: {:?}", e);
        }
    }

    fn release_line(&self, sensor: &Sensor) {
        self.board.disable_line(sensor.echo_line());
        self.session.set_state(MeasurementState::Idle);
    }

    fn window(&self, sensor: &Sensor) -> Micros {
        // an interval needs at least two ticks
        let window = sensor.timeout_us.max(2);
        window.min(self.systick.max_interval().ticks()).micros()
    }

    /// Times the echo from its rising edge: restarts the running window, or
    /// opens one if the edge beat the measuring loop to it.
    fn open_window(&self) {
        let result = if self.systick.interval_mode().is_some() {
            self.systick.restart_count()
        } else {
            self.systick
                .set_interval_single(self.session.window(), &window_elapsed)
        };
        if let Err(e) = result {
            warn!("echo: window not opened: {:?}", e);
        }
    }
}

/// Echo-line edge handler.
impl<B: Board, S: SysTickRegisters, const N: usize> Callable for UltrasonicPool<'_, B, S, N> {
    fn call(&self) {
        match self.session.state() {
            MeasurementState::WaitingForRisingEdge => {
                self.open_window();
                self.session.set_state(MeasurementState::WaitingForFallingEdge);
            }
            MeasurementState::WaitingForFallingEdge => {
                let us = self.systick.ticks_to_micros(self.systick.elapsed_counts());
                self.session.finish(echo_to_cm(us));
                if let Err(e) = self.systick.reset() {
                    warn!("echo: SysTick not reset: {:?}", e);
                }
                trace!("echo of {} us", us);
            }
            MeasurementState::Idle | MeasurementState::Done => {
                trace!("echo edge ignored");
            }
        }
    }
}

fn check_id<const N: usize>(id: usize) -> Result<(), Error> {
    if id < N {
        Ok(())
    } else {
        Err(Error::InvalidSensor(id))
    }
}
