#![no_main]
#![no_std]
#![allow(clippy::type_complexity)]

use bluepill_timers::config;
use bluepill_timers::hal::device::{CoreSysTick, Stm32f103, Tim};
use bluepill_timers::hal::periph::{Gpio, Level, Pin, Port};
use bluepill_timers::hal::systick::{ClockSource, SysTick, SysTickConfig};
use bluepill_timers::hal::tim::{TimeUnit, TimerBank, TimerClock};
use bluepill_timers::ultrasonic::{SensorState, UltrasonicConfig, UltrasonicPool};
use defmt_rtt as _; // global logger
use panic_probe as _;

// same panicking *behavior* as `panic-probe` but doesn't print a panic message
// this prevents the panic message being printed *twice* when `defmt::panic` is invoked
#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}

const fn pin(n: u8) -> Pin {
    match Pin::new(n) {
        Ok(pin) => pin,
        Err(_) => panic!("pin out of range"),
    }
}

const LED_PORT: Port = Port::C;
const LED_PIN: Pin = pin(13);

/// TIM3 CH1
const PWM_PORT: Port = Port::A;
const PWM_PIN: Pin = pin(6);

const fn sensor(echo_pin: u8, trigger_pin: u8) -> UltrasonicConfig {
    UltrasonicConfig {
        echo_port: Port::A,
        echo_pin: pin(echo_pin),
        trigger_port: Port::B,
        trigger_pin: pin(trigger_pin),
        range_cm: config::ultrasonic::DEFAULT_RANGE_CM,
        state: SensorState::Enabled,
    }
}

/// Echo lines land on EXTI0..2.
const SENSORS: [UltrasonicConfig; config::ultrasonic::SENSORS] =
    [sensor(0, 12), sensor(1, 13), sensor(2, 14)];

const SYSTICK_CONFIG: SysTickConfig =
    match SysTickConfig::new(config::clk::HCLK, ClockSource::AhbDiv8) {
        Ok(config) => config,
        Err(_) => panic!("SysTick clock is not a whole number of MHz"),
    };

const TIMER_CLOCK: TimerClock = match TimerClock::new(config::clk::TIMCLK, TimeUnit::Seconds) {
    Ok(clock) => clock,
    Err(_) => panic!("timer clock cannot be prescaled to 1kHz"),
};

static BOARD: Stm32f103 = Stm32f103::new();
static SYSTICK: SysTick<CoreSysTick> = SysTick::new(CoreSysTick, SYSTICK_CONFIG);
static TIMERS: TimerBank<Tim> = TimerBank::new(Tim::ALL, TIMER_CLOCK);
static SONAR: UltrasonicPool<'static, Stm32f103, CoreSysTick> =
    UltrasonicPool::new(&BOARD, &SYSTICK);

fn toggle_led() {
    let level = match BOARD.get_pin_value(LED_PORT, LED_PIN) {
        Level::Low => Level::High,
        Level::High => Level::Low,
    };
    BOARD.set_pin_value(LED_PORT, LED_PIN, level);
}

#[rtic::app(device = stm32f1xx_hal::pac, peripherals = true)]
mod app {
    use crate::{
        toggle_led, BOARD, LED_PIN, LED_PORT, PWM_PIN, PWM_PORT, SENSORS, SONAR, SYSTICK, TIMERS,
    };
    use bluepill_timers::config;
    use bluepill_timers::hal::periph::{Gpio, Peripheral, PinMode, Rcc};
    use bluepill_timers::hal::tim::pwm::{Channel, PwmConfig};
    use bluepill_timers::hal::tim::{TimerConfig, TimerId};
    use bluepill_timers::time::{ExtU32, RateExtU32};
    use bluepill_timers::ultrasonic::Reading;
    use stm32f1xx_hal::prelude::*;

    #[shared]
    struct Shared {}

    #[local]
    struct Local {}

    #[init]
    fn init(cx: init::Context) -> (Shared, Local, init::Monotonics) {
        defmt::info!("Configuring clocks...");

        let mut flash = cx.device.FLASH.constrain();
        let rcc = cx.device.RCC.constrain();

        let clocks = rcc
            .cfgr
            .use_hse(config::clk::HSE_FREQ)
            .sysclk(config::clk::SYSCLK)
            .hclk(config::clk::HCLK)
            .pclk1(config::clk::PCLK1)
            .pclk2(config::clk::PCLK2)
            .freeze(&mut flash.acr);

        assert!(config::clk::SYSCLK == clocks.sysclk());
        assert!(config::clk::HCLK == clocks.hclk());
        assert!(config::clk::PCLK1 == clocks.pclk1());
        assert!(config::clk::PCLK2 == clocks.pclk2());

        config::dump_to_log();

        defmt::info!("Configuring debug indicator LED...");

        BOARD.enable_peripheral_clock(Peripheral::Gpio(LED_PORT));
        BOARD.set_pin_mode(LED_PORT, LED_PIN, PinMode::OutputPushPull);

        defmt::info!("Configuring TIM2 blink interval...");

        BOARD.enable_peripheral_clock(Peripheral::Timer(TimerId::Tim2));
        TIMERS.init(TimerId::Tim2, &TimerConfig::new(500));
        defmt::unwrap!(TIMERS.set_interval_periodic(TimerId::Tim2, 500, 1, &toggle_led));

        defmt::info!("Configuring TIM3 PWM...");

        BOARD.enable_peripheral_clock(Peripheral::Gpio(PWM_PORT));
        BOARD.enable_peripheral_clock(Peripheral::Timer(TimerId::Tim3));
        BOARD.set_pin_mode(PWM_PORT, PWM_PIN, PinMode::AlternatePushPull);
        let pwm = PwmConfig {
            frequency: Some(1.kHz()),
            ..PwmConfig::new(Channel::C1, 999)
        };
        defmt::unwrap!(TIMERS.pwm_init(TimerId::Tim3, &pwm));
        defmt::unwrap!(TIMERS.set_duty_cycle(TimerId::Tim3, Channel::C1, 25));

        defmt::info!("Configuring ultrasonic sensors...");

        for (id, sensor) in SENSORS.iter().enumerate() {
            defmt::unwrap!(SONAR.init(id, sensor));
        }

        defmt::info!("Finished init.");

        (Shared {}, Local {}, init::Monotonics())
    }

    #[idle]
    fn idle(_: idle::Context) -> ! {
        loop {
            for id in 0..SENSORS.len() {
                match SONAR.read_distance(id) {
                    Ok(Reading::Distance(cm)) => defmt::info!("sensor {}: {} cm", id, cm),
                    Ok(reading) => defmt::debug!("sensor {}: {}", id, reading),
                    Err(e) => defmt::warn!("sensor {}: {}", id, e),
                }
            }
            // let the last echoes die out before triggering again
            if let Err(e) = SYSTICK.delay_ms_blocking(60.millis()) {
                defmt::warn!("delay failed: {}", e);
            }
        }
    }

    #[task(binds = SysTick, priority = 1)]
    fn systick(_: systick::Context) {
        SYSTICK.on_interrupt();
    }

    #[task(binds = TIM2, priority = 1)]
    fn tim2(_: tim2::Context) {
        TIMERS.tim2_irq();
    }

    #[task(binds = EXTI0, priority = 1)]
    fn exti0(_: exti0::Context) {
        BOARD.exti0_irq();
    }

    #[task(binds = EXTI1, priority = 1)]
    fn exti1(_: exti1::Context) {
        BOARD.exti1_irq();
    }

    #[task(binds = EXTI2, priority = 1)]
    fn exti2(_: exti2::Context) {
        BOARD.exti2_irq();
    }
}
