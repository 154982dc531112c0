//! Register-level drivers.
//!
//! Drivers are generic over small register-access traits so the same code runs
//! against the real peripherals (`device`, bare-metal builds only) and against
//! the simulations used by the unit tests (`sim`).

pub mod periph;
pub mod systick;
pub mod tim;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod device;

#[cfg(test)]
pub(crate) mod sim;
