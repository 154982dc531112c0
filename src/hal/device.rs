//! STM32F103 backends for the register and peripheral traits.

use super::periph::{
    Afio, Edge, Exti, ExtiLine, Gpio, Interrupt, Level, Nvic, Peripheral, Pin, PinMode, Port, Rcc,
};
use super::systick::SysTickRegisters;
use super::tim::regs::{Reg, TimerRegisters};
use super::tim::TimerId;
use crate::callback::CallbackRegistry;
use crate::{trace, Callback};
use core::ops::RangeInclusive;
use cortex_m::peripheral::{syst, NVIC, SYST};
use stm32f1xx_hal::pac;

/// Register handle for one of TIM1..TIM4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tim {
    Tim1,
    Tim2,
    Tim3,
    Tim4,
}

impl Tim {
    /// Handles in [`TimerId`] order, as a timer bank expects them.
    pub const ALL: [Tim; 4] = [Self::Tim1, Self::Tim2, Self::Tim3, Self::Tim4];
}

impl From<TimerId> for Tim {
    fn from(id: TimerId) -> Self {
        Self::ALL[id.index()]
    }
}

// TIM1 is an advanced timer and has its own register block type, but the
// registers used here have the same layout on all four.
macro_rules! with_tim {
    ($tim:expr, |$t:ident| $body:expr) => {
        match $tim {
            // NOTE(unsafe) the register blocks are always mapped
            Tim::Tim1 => {
                let $t = unsafe { &*pac::TIM1::ptr() };
                $body
            }
            Tim::Tim2 => {
                let $t = unsafe { &*pac::TIM2::ptr() };
                $body
            }
            Tim::Tim3 => {
                let $t = unsafe { &*pac::TIM3::ptr() };
                $body
            }
            Tim::Tim4 => {
                let $t = unsafe { &*pac::TIM4::ptr() };
                $body
            }
        }
    };
}

impl TimerRegisters for Tim {
    #[allow(clippy::cast_possible_truncation)]
    fn read(&self, reg: Reg) -> u16 {
        if reg == Reg::Bdtr {
            return match self {
                Tim::Tim1 => unsafe { (*pac::TIM1::ptr()).bdtr.read().bits() as u16 },
                _ => 0,
            };
        }
        let bits = with_tim!(*self, |t| match reg {
            Reg::Cr1 => t.cr1.read().bits(),
            Reg::Dier => t.dier.read().bits(),
            Reg::Sr => t.sr.read().bits(),
            Reg::Ccmr1 => t.ccmr1_output().read().bits(),
            Reg::Ccmr2 => t.ccmr2_output().read().bits(),
            Reg::Ccer => t.ccer.read().bits(),
            Reg::Cnt => t.cnt.read().bits(),
            Reg::Psc => t.psc.read().bits(),
            Reg::Arr => t.arr.read().bits(),
            Reg::Ccr1 => t.ccr1.read().bits(),
            Reg::Ccr2 => t.ccr2.read().bits(),
            Reg::Ccr3 => t.ccr3.read().bits(),
            Reg::Ccr4 => t.ccr4.read().bits(),
            // write-only
            Reg::Egr | Reg::Bdtr => 0,
        });
        bits as u16
    }

    fn write(&self, reg: Reg, value: u16) {
        let bits = u32::from(value);
        if reg == Reg::Bdtr {
            // only the advanced timer has a break/dead-time register
            if *self == Tim::Tim1 {
                unsafe { (*pac::TIM1::ptr()).bdtr.write(|w| w.bits(bits)) };
            }
            return;
        }
        with_tim!(*self, |t| unsafe {
            match reg {
                Reg::Cr1 => t.cr1.write(|w| w.bits(bits)),
                Reg::Dier => t.dier.write(|w| w.bits(bits)),
                Reg::Sr => t.sr.write(|w| w.bits(bits)),
                Reg::Egr => t.egr.write(|w| w.bits(bits)),
                Reg::Ccmr1 => t.ccmr1_output().write(|w| w.bits(bits)),
                Reg::Ccmr2 => t.ccmr2_output().write(|w| w.bits(bits)),
                Reg::Ccer => t.ccer.write(|w| w.bits(bits)),
                Reg::Cnt => t.cnt.write(|w| w.bits(bits)),
                Reg::Psc => t.psc.write(|w| w.bits(bits)),
                Reg::Arr => t.arr.write(|w| w.bits(bits)),
                Reg::Ccr1 => t.ccr1.write(|w| w.bits(bits)),
                Reg::Ccr2 => t.ccr2.write(|w| w.bits(bits)),
                Reg::Ccr3 => t.ccr3.write(|w| w.bits(bits)),
                Reg::Ccr4 => t.ccr4.write(|w| w.bits(bits)),
                Reg::Bdtr => {}
            }
        });
    }
}

/// The Cortex-M SysTick.
///
/// Owning the `SYST` peripheral is left to the application; this handle
/// only touches CSR, RVR and CVR.
pub struct CoreSysTick;

impl CoreSysTick {
    fn syst() -> &'static syst::RegisterBlock {
        // NOTE(unsafe) always mapped
        unsafe { &*SYST::PTR }
    }
}

impl SysTickRegisters for CoreSysTick {
    fn ctrl(&self) -> u32 {
        Self::syst().csr.read()
    }

    fn set_ctrl(&self, value: u32) {
        unsafe { Self::syst().csr.write(value) }
    }

    fn load(&self) -> u32 {
        Self::syst().rvr.read()
    }

    fn set_load(&self, value: u32) {
        unsafe { Self::syst().rvr.write(value) }
    }

    fn val(&self) -> u32 {
        Self::syst().cvr.read()
    }

    fn set_val(&self, value: u32) {
        unsafe { Self::syst().cvr.write(value) }
    }
}

/// GPIO, RCC, NVIC, AFIO and EXTI of the chip, plus the EXTI interrupt
/// dispatch. Read-modify-write sequences run in a critical section.
pub struct Stm32f103 {
    exti_callbacks: CallbackRegistry<16>,
}

fn gpio(port: Port) -> &'static pac::gpioa::RegisterBlock {
    // NOTE(unsafe) only atomic BSRR writes, IDR reads and critical-section RMW
    unsafe {
        match port {
            Port::A => &*pac::GPIOA::ptr(),
            Port::B => &*pac::GPIOB::ptr(),
            Port::C => &*pac::GPIOC::ptr(),
        }
    }
}

fn rcc() -> &'static pac::rcc::RegisterBlock {
    unsafe { &*pac::RCC::ptr() }
}

fn afio() -> &'static pac::afio::RegisterBlock {
    unsafe { &*pac::AFIO::ptr() }
}

fn exti() -> &'static pac::exti::RegisterBlock {
    unsafe { &*pac::EXTI::ptr() }
}

/// CNF and MODE nibble of a CRL/CRH pin slot. Outputs run at 50MHz.
const fn config_bits(mode: PinMode) -> u32 {
    match mode {
        PinMode::InputFloating => 0b0100,
        PinMode::InputPullUp | PinMode::InputPullDown => 0b1000,
        PinMode::OutputPushPull => 0b0011,
        PinMode::OutputOpenDrain => 0b0111,
        PinMode::AlternatePushPull => 0b1011,
    }
}

impl Stm32f103 {
    pub const fn new() -> Self {
        Self {
            exti_callbacks: CallbackRegistry::new(),
        }
    }

    fn dispatch(&self, lines: RangeInclusive<u8>) {
        let exti = exti();
        let pending = exti.pr.read().bits();
        for line in lines {
            let mask = 1 << line;
            if pending & mask != 0 {
                // PR is rc_w1
                exti.pr.write(|w| unsafe { w.bits(mask) });
                if !self.exti_callbacks.invoke(usize::from(line)) {
                    trace!("EXTI{}: no handler", line);
                }
            }
        }
    }

    pub fn exti0_irq(&self) {
        self.dispatch(0..=0);
    }

    pub fn exti1_irq(&self) {
        self.dispatch(1..=1);
    }

    pub fn exti2_irq(&self) {
        self.dispatch(2..=2);
    }

    pub fn exti3_irq(&self) {
        self.dispatch(3..=3);
    }

    pub fn exti4_irq(&self) {
        self.dispatch(4..=4);
    }

    pub fn exti9_5_irq(&self) {
        self.dispatch(5..=9);
    }

    pub fn exti15_10_irq(&self) {
        self.dispatch(10..=15);
    }
}

impl Gpio for Stm32f103 {
    fn set_pin_mode(&self, port: Port, pin: Pin, mode: PinMode) {
        let gpio = gpio(port);
        let n = u32::from(pin.number());
        let shift = (n % 8) * 4;
        let bits = config_bits(mode) << shift;
        critical_section::with(|_| {
            if n < 8 {
                gpio.crl
                    .modify(|r, w| unsafe { w.bits((r.bits() & !(0xF << shift)) | bits) });
            } else {
                gpio.crh
                    .modify(|r, w| unsafe { w.bits((r.bits() & !(0xF << shift)) | bits) });
            }
        });
        // the pull direction of an input is picked through ODR
        match mode {
            PinMode::InputPullUp => gpio.bsrr.write(|w| unsafe { w.bits(1 << n) }),
            PinMode::InputPullDown => gpio.bsrr.write(|w| unsafe { w.bits(1 << (n + 16)) }),
            _ => {}
        }
    }

    fn set_pin_value(&self, port: Port, pin: Pin, level: Level) {
        let n = u32::from(pin.number());
        let bits = match level {
            Level::High => 1 << n,
            Level::Low => 1 << (n + 16),
        };
        gpio(port).bsrr.write(|w| unsafe { w.bits(bits) });
    }

    fn get_pin_value(&self, port: Port, pin: Pin) -> Level {
        if gpio(port).idr.read().bits() & (1 << pin.number()) != 0 {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl Rcc for Stm32f103 {
    fn enable_peripheral_clock(&self, peripheral: Peripheral) {
        let rcc = rcc();
        critical_section::with(|_| match peripheral {
            Peripheral::Afio => rcc.apb2enr.modify(|_, w| w.afioen().set_bit()),
            Peripheral::Gpio(Port::A) => rcc.apb2enr.modify(|_, w| w.iopaen().set_bit()),
            Peripheral::Gpio(Port::B) => rcc.apb2enr.modify(|_, w| w.iopben().set_bit()),
            Peripheral::Gpio(Port::C) => rcc.apb2enr.modify(|_, w| w.iopcen().set_bit()),
            Peripheral::Timer(TimerId::Tim1) => rcc.apb2enr.modify(|_, w| w.tim1en().set_bit()),
            Peripheral::Timer(TimerId::Tim2) => rcc.apb1enr.modify(|_, w| w.tim2en().set_bit()),
            Peripheral::Timer(TimerId::Tim3) => rcc.apb1enr.modify(|_, w| w.tim3en().set_bit()),
            Peripheral::Timer(TimerId::Tim4) => rcc.apb1enr.modify(|_, w| w.tim4en().set_bit()),
        });
    }
}

impl Nvic for Stm32f103 {
    fn enable_irq(&self, irq: Interrupt) {
        let irq = match irq {
            Interrupt::Exti0 => pac::Interrupt::EXTI0,
            Interrupt::Exti1 => pac::Interrupt::EXTI1,
            Interrupt::Exti2 => pac::Interrupt::EXTI2,
            Interrupt::Exti3 => pac::Interrupt::EXTI3,
            Interrupt::Exti4 => pac::Interrupt::EXTI4,
            Interrupt::Exti9_5 => pac::Interrupt::EXTI9_5,
            Interrupt::Exti15_10 => pac::Interrupt::EXTI15_10,
        };
        // NOTE(unsafe) the handlers only touch interrupt-safe driver state
        unsafe { NVIC::unmask(irq) };
    }
}

impl Afio for Stm32f103 {
    fn set_exti_port_mapping(&self, line: ExtiLine, port: Port) {
        let afio = afio();
        let shift = u32::from(line.number() % 4) * 4;
        let code = u32::from(port.code()) << shift;
        let update = |r: u32| (r & !(0xF << shift)) | code;
        critical_section::with(|_| match line.number() / 4 {
            0 => afio.exticr1.modify(|r, w| unsafe { w.bits(update(r.bits())) }),
            1 => afio.exticr2.modify(|r, w| unsafe { w.bits(update(r.bits())) }),
            2 => afio.exticr3.modify(|r, w| unsafe { w.bits(update(r.bits())) }),
            _ => afio.exticr4.modify(|r, w| unsafe { w.bits(update(r.bits())) }),
        });
    }
}

impl Exti for Stm32f103 {
    fn enable_line(&self, line: ExtiLine) {
        let exti = exti();
        critical_section::with(|_| {
            exti.imr
                .modify(|r, w| unsafe { w.bits(r.bits() | line.mask()) })
        });
    }

    fn disable_line(&self, line: ExtiLine) {
        let exti = exti();
        critical_section::with(|_| {
            exti.imr
                .modify(|r, w| unsafe { w.bits(r.bits() & !line.mask()) })
        });
    }

    fn set_trigger_edge(&self, line: ExtiLine, edge: Edge) {
        let exti = exti();
        let (rising, falling) = match edge {
            Edge::Rising => (true, false),
            Edge::Falling => (false, true),
            Edge::Both => (true, true),
        };
        let apply = |r: u32, on: bool| {
            if on {
                r | line.mask()
            } else {
                r & !line.mask()
            }
        };
        critical_section::with(|_| {
            exti.rtsr
                .modify(|r, w| unsafe { w.bits(apply(r.bits(), rising)) });
            exti.ftsr
                .modify(|r, w| unsafe { w.bits(apply(r.bits(), falling)) });
        });
    }

    fn set_callback(&self, line: ExtiLine, callback: Callback) {
        // lines are always below 16
        let _ = self
            .exti_callbacks
            .register(usize::from(line.number()), callback);
    }
}
