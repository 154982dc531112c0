use crate::info;

pub fn dump_to_log() {
    info!(
        "\n\
        Clocks:\n\
        - HSE_FREQ: {} Hz\n\
        - SYSCLK:   {} Hz\n\
        - HCLK:     {} Hz\n\
        - PCLK1:    {} Hz\n\
        - PCLK2:    {} Hz\n\
        - TIMCLK:   {} Hz\n\
        SysTick:\n\
        - RELOAD_MAX: {}\n\
        - CLOCK_DIVIDER: {}\n\
        Ultrasonic:\n\
        - SENSORS: {}\n\
        - DEFAULT_RANGE: {} cm\n\
        ",
        clk::HSE_FREQ.to_Hz(),
        clk::SYSCLK.to_Hz(),
        clk::HCLK.to_Hz(),
        clk::PCLK1.to_Hz(),
        clk::PCLK2.to_Hz(),
        clk::TIMCLK.to_Hz(),
        systick::RELOAD_MAX,
        systick::CLOCK_DIVIDER,
        ultrasonic::SENSORS,
        ultrasonic::DEFAULT_RANGE_CM,
    );
}

/// Clock configuration
///
/// See clock tree in https://www.st.com/resource/en/datasheet/stm32f103c8.pdf
/// The reference setup runs straight off the 8MHz crystal with every prescaler
/// at /1, so SysTick at HCLK/8 counts exactly one tick per microsecond.
pub mod clk {
    use fugit::Rate;

    pub const HSE_FREQ: Rate<u32, 1, 1> = Rate::<u32, 1, 1>::MHz(8);

    /// No PLL
    pub const SYSCLK: Rate<u32, 1, 1> = Rate::<u32, 1, 1>::MHz(8);

    /// AHB prescaler @ /1, feeds SysTick
    pub const HCLK: Rate<u32, 1, 1> = Rate::<u32, 1, 1>::MHz(8);

    /// APB1 prescaler @ /1 (max 36MHz)
    pub const PCLK1: Rate<u32, 1, 1> = Rate::<u32, 1, 1>::MHz(8);
    /// APB2 prescaler @ /1 (max 72MHz)
    pub const PCLK2: Rate<u32, 1, 1> = Rate::<u32, 1, 1>::MHz(8);

    /// Timers run at PCLK when the APB prescaler is /1
    pub const TIMCLK: Rate<u32, 1, 1> = PCLK2;
}

/// General-purpose timer configuration
pub mod tim {
    /// TIM1..TIM4
    pub const COUNT: usize = 4;
}

/// SysTick configuration
pub mod systick {
    /// SysTick is a 24-bit down-counter
    pub const RELOAD_MAX: u32 = 0x00FF_FFFF;

    /// HCLK/8
    pub const CLOCK_DIVIDER: u8 = 8;
}

/// Ultrasonic ranging configuration
pub mod ultrasonic {
    /// Sensors wired on the reference board (right, left, middle)
    pub const SENSORS: usize = 3;

    pub const DEFAULT_RANGE_CM: u16 = 200;

    /// Echo round trip per centimetre of range, in microseconds
    pub const TIMEOUT_US_PER_CM: f32 = 58.842;

    /// Half the speed of sound, in centimetres per microsecond
    pub const CM_PER_ECHO_US: f32 = 0.017;

    /// Trigger held low before the pulse
    pub const TRIGGER_SETTLE_US: u32 = 2;

    /// Trigger pulse width
    pub const TRIGGER_PULSE_US: u32 = 10;
}
