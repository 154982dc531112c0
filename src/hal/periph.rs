//! Interfaces to the peripherals the timer drivers lean on: GPIO, RCC, NVIC,
//! AFIO and EXTI.

use crate::hal::tim::TimerId;
use crate::{Callback, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    A,
    B,
    C,
}

impl Port {
    /// Port selector used by the AFIO EXTI mapping registers.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// A pin number within a port, 0..=15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pin(u8);

impl Pin {
    pub const fn new(n: u8) -> Result<Self, Error> {
        if n < 16 {
            Ok(Self(n))
        } else {
            Err(Error::InvalidPin(n))
        }
    }

    pub const fn number(self) -> u8 {
        self.0
    }

    /// Each pin number owns the EXTI line of the same number.
    pub const fn exti_line(self) -> ExtiLine {
        ExtiLine(self.0)
    }
}

impl TryFrom<u8> for Pin {
    type Error = Error;

    fn try_from(n: u8) -> Result<Self, Error> {
        Self::new(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExtiLine(u8);

impl ExtiLine {
    pub const fn number(self) -> u8 {
        self.0
    }

    pub const fn mask(self) -> u32 {
        1 << self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinMode {
    InputFloating,
    InputPullUp,
    InputPullDown,
    OutputPushPull,
    OutputOpenDrain,
    AlternatePushPull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Peripheral {
    Afio,
    Gpio(Port),
    Timer(TimerId),
}

/// NVIC vectors used by the EXTI lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    Exti0,
    Exti1,
    Exti2,
    Exti3,
    Exti4,
    Exti9_5,
    Exti15_10,
}

impl Interrupt {
    /// Lines 0..=4 have dedicated vectors, 5..=9 and 10..=15 share one each.
    pub const fn for_exti_line(line: ExtiLine) -> Self {
        match line.number() {
            0 => Self::Exti0,
            1 => Self::Exti1,
            2 => Self::Exti2,
            3 => Self::Exti3,
            4 => Self::Exti4,
            5..=9 => Self::Exti9_5,
            _ => Self::Exti15_10,
        }
    }
}

pub trait Gpio {
    fn set_pin_mode(&self, port: Port, pin: Pin, mode: PinMode);
    fn set_pin_value(&self, port: Port, pin: Pin, level: Level);
    fn get_pin_value(&self, port: Port, pin: Pin) -> Level;
}

pub trait Rcc {
    fn enable_peripheral_clock(&self, peripheral: Peripheral);
}

pub trait Nvic {
    fn enable_irq(&self, irq: Interrupt);
}

pub trait Afio {
    fn set_exti_port_mapping(&self, line: ExtiLine, port: Port);
}

pub trait Exti {
    fn enable_line(&self, line: ExtiLine);
    fn disable_line(&self, line: ExtiLine);
    fn set_trigger_edge(&self, line: ExtiLine, edge: Edge);
    fn set_callback(&self, line: ExtiLine, callback: Callback);
}

/// Everything a sensor driver needs from the chip.
pub trait Board: Gpio + Rcc + Nvic + Afio + Exti + Sync {}

impl<T> Board for T where T: Gpio + Rcc + Nvic + Afio + Exti + Sync {}
