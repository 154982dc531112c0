//! TIMx register map as seen by the driver.
//!
//! Only the registers the driver touches are modelled. All of them are 16 bits
//! wide on TIM1..TIM4 of the F103, even where the bus access is 32 bits.

/// Registers of one timer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    Cr1,
    Dier,
    Sr,
    Egr,
    Ccmr1,
    Ccmr2,
    Ccer,
    Cnt,
    Psc,
    Arr,
    Ccr1,
    Ccr2,
    Ccr3,
    Ccr4,
    /// Break and dead-time, advanced timer (TIM1) only
    Bdtr,
}

pub const REG_COUNT: usize = 15;

/// Raw access to one timer's registers.
///
/// Implementations must be usable from interrupt context through `&self`.
pub trait TimerRegisters: Sync {
    fn read(&self, reg: Reg) -> u16;
    fn write(&self, reg: Reg, value: u16);

    fn modify(&self, reg: Reg, f: impl FnOnce(u16) -> u16) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }

    fn set_bits(&self, reg: Reg, mask: u16) {
        self.modify(reg, |r| r | mask);
    }

    fn clear_bits(&self, reg: Reg, mask: u16) {
        self.modify(reg, |r| r & !mask);
    }
}

pub mod cr1 {
    pub const CEN: u16 = 1 << 0;
    pub const DIR: u16 = 1 << 4;
    pub const CMS_SHIFT: u16 = 5;
    pub const CMS: u16 = 0b11 << CMS_SHIFT;
    /// Center-aligned mode 2
    pub const CMS_CENTER: u16 = 0b10 << CMS_SHIFT;
    pub const ARPE: u16 = 1 << 7;
    pub const CKD_SHIFT: u16 = 8;
    pub const CKD: u16 = 0b11 << CKD_SHIFT;
}

pub mod dier {
    pub const UIE: u16 = 1 << 0;
}

pub mod sr {
    pub const UIF: u16 = 1 << 0;
}

pub mod egr {
    pub const UG: u16 = 1 << 0;
}

/// Output-compare fields of CCMR1 (channels 1, 2) and CCMR2 (channels 3, 4).
/// The odd channel of each register sits in the low byte, the even one in the
/// high byte.
pub mod ccmr {
    pub const OCPE_LOW: u16 = 1 << 3;
    pub const OCM_LOW_SHIFT: u16 = 4;
    pub const OCPE_HIGH: u16 = 1 << 11;
    pub const OCM_HIGH_SHIFT: u16 = 12;
    pub const OCM_MASK: u16 = 0b111;
}

pub mod ccer {
    /// CCxE of channel `n` (1-based) sits at `4 * (n - 1)`, CCxP right above it.
    pub const fn cce(n: u8) -> u16 {
        1 << (4 * (n as u16 - 1))
    }

    pub const fn ccp(n: u8) -> u16 {
        1 << (4 * (n as u16 - 1) + 1)
    }
}

pub mod bdtr {
    pub const MOE: u16 = 1 << 15;
}
