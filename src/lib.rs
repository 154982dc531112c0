//! Timer drivers for the STM32F103C8 ("blue pill").
//!
//! The general-purpose timers (TIM1..TIM4), the SysTick core timer and an
//! interrupt-driven HC-SR04 style ultrasonic ranging driver built on top of
//! them. Every driver takes `&self` and is meant to live in a `static` shared
//! between foreground code and interrupt handlers.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::new_without_default, clippy::type_complexity)]
#![warn(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::ptr_as_ptr
)]

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
pub(crate) use defmt::{debug, error, info, trace, warn};

#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
pub(crate) use log::{debug, error, info, trace, warn};

pub mod callback;
pub mod config;
pub mod error;
pub mod hal;
pub mod time;
pub mod ultrasonic;

pub use callback::{Callable, Callback};
pub use error::Error;
