//! PWM output on the four capture/compare channels of each timer.

use super::regs::{bdtr, ccer, ccmr, cr1, egr, Reg, TimerRegisters};
use super::{TimerBank, TimerId};
use crate::time::Hertz;
use crate::{debug, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    C1,
    C2,
    C3,
    C4,
}

impl Channel {
    pub const fn number(self) -> u8 {
        self as u8 + 1
    }

    /// CCMR register, OCxM shift and OCxPE bit of this channel.
    const fn ccmr(self) -> (Reg, u16, u16) {
        match self {
            Self::C1 => (Reg::Ccmr1, ccmr::OCM_LOW_SHIFT, ccmr::OCPE_LOW),
            Self::C2 => (Reg::Ccmr1, ccmr::OCM_HIGH_SHIFT, ccmr::OCPE_HIGH),
            Self::C3 => (Reg::Ccmr2, ccmr::OCM_LOW_SHIFT, ccmr::OCPE_LOW),
            Self::C4 => (Reg::Ccmr2, ccmr::OCM_HIGH_SHIFT, ccmr::OCPE_HIGH),
        }
    }

    const fn ccr(self) -> Reg {
        match self {
            Self::C1 => Reg::Ccr1,
            Self::C2 => Reg::Ccr2,
            Self::C3 => Reg::Ccr3,
            Self::C4 => Reg::Ccr4,
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = Error;

    fn try_from(n: u8) -> Result<Self, Error> {
        match n {
            1 => Ok(Self::C1),
            2 => Ok(Self::C2),
            3 => Ok(Self::C3),
            4 => Ok(Self::C4),
            _ => Err(Error::InvalidChannel(n)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmMode {
    /// Active while CNT < CCR
    Mode1,
    /// Inactive while CNT < CCR
    Mode2,
}

impl PwmMode {
    const fn bits(self) -> u16 {
        match self {
            Self::Mode1 => 0b110,
            Self::Mode2 => 0b111,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmConfig {
    /// Auto-reload value; the duty cycle is a fraction of it
    pub period: u16,
    pub channel: Channel,
    /// Output frequency. `None` keeps the prescaler of the timer clock.
    pub frequency: Option<Hertz>,
    pub mode: PwmMode,
    pub polarity: Polarity,
}

impl PwmConfig {
    pub const fn new(channel: Channel, period: u16) -> Self {
        Self {
            period,
            channel,
            frequency: None,
            mode: PwmMode::Mode1,
            polarity: Polarity::ActiveHigh,
        }
    }
}

impl<R: TimerRegisters> TimerBank<R> {
    /// Configures `config.channel` for PWM and starts the counter.
    pub fn pwm_init(&self, id: TimerId, config: &PwmConfig) -> Result<(), Error> {
        let prescaler = match config.frequency {
            Some(frequency) => Some(self.pwm_prescaler(frequency, config.period)?),
            None => None,
        };

        let tim = self.regs(id);
        let channel = config.channel;
        if let Some(prescaler) = prescaler {
            tim.write(Reg::Psc, prescaler);
        }

        let (reg, shift, preload) = channel.ccmr();
        tim.modify(reg, |r| {
            (r & !(ccmr::OCM_MASK << shift)) | config.mode.bits() << shift | preload
        });
        let (enable, active_low) = (ccer::cce(channel.number()), ccer::ccp(channel.number()));
        tim.modify(Reg::Ccer, |r| match config.polarity {
            Polarity::ActiveHigh => (r & !active_low) | enable,
            Polarity::ActiveLow => r | active_low | enable,
        });
        if id == TimerId::Tim1 {
            // advanced timer outputs stay off without the main output enable
            tim.set_bits(Reg::Bdtr, bdtr::MOE);
        }

        tim.write(Reg::Arr, config.period);
        tim.set_bits(Reg::Cr1, cr1::ARPE | cr1::CEN);
        tim.write(Reg::Egr, egr::UG);

        debug!("{:?} channel {}: pwm, period {}", id, channel.number(), config.period);
        Ok(())
    }

    /// Sets CCRx to `percent` of the current period.
    pub fn set_duty_cycle(&self, id: TimerId, channel: Channel, percent: u8) -> Result<(), Error> {
        if percent > 100 {
            return Err(Error::InvalidDutyCycle(percent));
        }
        let tim = self.regs(id);
        let period = u32::from(tim.read(Reg::Arr));
        let compare = period * u32::from(percent) / 100;
        // compare <= period, which came from a u16
        tim.write(channel.ccr(), u16::try_from(compare).unwrap_or(u16::MAX));
        Ok(())
    }

    /// Turns off PWM on one channel. Other channels of the timer keep running.
    pub fn pwm_deinit(&self, id: TimerId, channel: Channel) {
        let tim = self.regs(id);
        let (reg, shift, preload) = channel.ccmr();
        tim.clear_bits(reg, ccmr::OCM_MASK << shift | preload);
        tim.clear_bits(Reg::Ccer, ccer::cce(channel.number()) | ccer::ccp(channel.number()));
        debug!("{:?} channel {}: pwm off", id, channel.number());
    }

    fn pwm_prescaler(&self, frequency: Hertz, period: u16) -> Result<u16, Error> {
        let hz = frequency.to_Hz();
        let per_second = u64::from(hz) * (u64::from(period) + 1);
        if per_second == 0 {
            return Err(Error::UnachievableFrequency(hz));
        }
        let div = u64::from(self.clock.clock().to_Hz()) / per_second;
        if div == 0 {
            return Err(Error::UnachievableFrequency(hz));
        }
        u16::try_from(div - 1).map_err(|_| Error::UnachievableFrequency(hz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{sim_timers, SimTimer};
    use crate::hal::tim::{TimeUnit, TimerClock};
    use crate::time::RateExtU32;

    fn bank() -> TimerBank<SimTimer> {
        let clock = TimerClock::new(8.MHz(), TimeUnit::Milliseconds).unwrap();
        TimerBank::new(sim_timers(), clock)
    }

    fn ocm(tim: &SimTimer, channel: Channel) -> u16 {
        let (reg, shift, _) = channel.ccmr();
        tim.get(reg) >> shift & ccmr::OCM_MASK
    }

    #[test]
    fn channel_ordinals() {
        assert_eq!(Channel::try_from(1), Ok(Channel::C1));
        assert_eq!(Channel::try_from(4), Ok(Channel::C4));
        assert_eq!(Channel::try_from(0), Err(Error::InvalidChannel(0)));
        assert_eq!(Channel::try_from(5), Err(Error::InvalidChannel(5)));
    }

    #[test]
    fn init_programs_channel() {
        let bank = bank();
        let config = PwmConfig {
            mode: PwmMode::Mode2,
            ..PwmConfig::new(Channel::C4, 999)
        };
        bank.pwm_init(TimerId::Tim3, &config).unwrap();

        let tim = &bank.regs[2];
        assert_eq!(ocm(tim, Channel::C4), 0b111);
        assert_ne!(tim.get(Reg::Ccmr2) & ccmr::OCPE_HIGH, 0);
        // channel 3 shares CCMR2 and must be untouched
        assert_eq!(ocm(tim, Channel::C3), 0);
        assert_eq!(tim.get(Reg::Ccmr2) & ccmr::OCPE_LOW, 0);
        assert_eq!(tim.get(Reg::Ccer), ccer::cce(4));
        assert_eq!(tim.get(Reg::Arr), 999);
        assert_eq!(tim.get(Reg::Cr1) & (cr1::ARPE | cr1::CEN), cr1::ARPE | cr1::CEN);
        assert_eq!(tim.get(Reg::Bdtr), 0);
    }

    #[test]
    fn advanced_timer_gets_main_output_enable() {
        let bank = bank();
        let config = PwmConfig {
            polarity: Polarity::ActiveLow,
            ..PwmConfig::new(Channel::C1, 100)
        };
        bank.pwm_init(TimerId::Tim1, &config).unwrap();

        let tim = &bank.regs[0];
        assert_eq!(ocm(tim, Channel::C1), 0b110);
        assert_eq!(tim.get(Reg::Ccer), ccer::cce(1) | ccer::ccp(1));
        assert_ne!(tim.get(Reg::Bdtr) & bdtr::MOE, 0);
    }

    #[test]
    fn duty_cycle_bounds() {
        let bank = bank();
        bank.pwm_init(TimerId::Tim2, &PwmConfig::new(Channel::C2, 1000)).unwrap();

        let tim = &bank.regs[1];
        let mut last = 0;
        for percent in 0..=100 {
            bank.set_duty_cycle(TimerId::Tim2, Channel::C2, percent).unwrap();
            let ccr = tim.get(Reg::Ccr2);
            assert!(ccr >= last);
            last = ccr;
        }

        bank.set_duty_cycle(TimerId::Tim2, Channel::C2, 0).unwrap();
        assert_eq!(tim.get(Reg::Ccr2), 0);
        bank.set_duty_cycle(TimerId::Tim2, Channel::C2, 50).unwrap();
        assert_eq!(tim.get(Reg::Ccr2), 500);
        bank.set_duty_cycle(TimerId::Tim2, Channel::C2, 100).unwrap();
        assert_eq!(tim.get(Reg::Ccr2), 1000);

        assert_eq!(
            bank.set_duty_cycle(TimerId::Tim2, Channel::C2, 101),
            Err(Error::InvalidDutyCycle(101))
        );
        assert_eq!(tim.get(Reg::Ccr2), 1000);
    }

    #[test]
    fn full_period_duty_does_not_overflow() {
        let bank = bank();
        bank.pwm_init(TimerId::Tim4, &PwmConfig::new(Channel::C1, u16::MAX)).unwrap();
        bank.set_duty_cycle(TimerId::Tim4, Channel::C1, 100).unwrap();
        assert_eq!(bank.regs[3].get(Reg::Ccr1), u16::MAX);
        bank.set_duty_cycle(TimerId::Tim4, Channel::C1, 99).unwrap();
        assert_eq!(bank.regs[3].get(Reg::Ccr1), 64_879);
    }

    #[test]
    fn deinit_leaves_other_channels() {
        let bank = bank();
        bank.pwm_init(TimerId::Tim2, &PwmConfig::new(Channel::C3, 100)).unwrap();
        let config = PwmConfig {
            polarity: Polarity::ActiveLow,
            ..PwmConfig::new(Channel::C4, 100)
        };
        bank.pwm_init(TimerId::Tim2, &config).unwrap();

        bank.pwm_deinit(TimerId::Tim2, Channel::C4);

        let tim = &bank.regs[1];
        assert_eq!(ocm(tim, Channel::C4), 0);
        assert_eq!(tim.get(Reg::Ccmr2) & ccmr::OCPE_HIGH, 0);
        assert_eq!(ocm(tim, Channel::C3), 0b110);
        assert_ne!(tim.get(Reg::Ccmr2) & ccmr::OCPE_LOW, 0);
        assert_eq!(tim.get(Reg::Ccer), ccer::cce(3));
    }

    #[test]
    fn frequency_sets_prescaler() {
        let bank = bank();
        let config = PwmConfig {
            frequency: Some(1.kHz()),
            ..PwmConfig::new(Channel::C1, 999)
        };
        bank.pwm_init(TimerId::Tim2, &config).unwrap();
        // 8MHz / (1kHz * 1000) = 8
        assert_eq!(bank.regs[1].get(Reg::Psc), 7);

        let slow = PwmConfig {
            frequency: Some(1.Hz()),
            ..PwmConfig::new(Channel::C1, 0)
        };
        assert_eq!(bank.pwm_init(TimerId::Tim3, &slow), Err(Error::UnachievableFrequency(1)));
        let fast = PwmConfig {
            frequency: Some(1.MHz()),
            ..PwmConfig::new(Channel::C1, 999)
        };
        assert_eq!(
            bank.pwm_init(TimerId::Tim3, &fast),
            Err(Error::UnachievableFrequency(1_000_000))
        );
        assert_eq!(bank.regs[2].writes(), 0);
    }
}
