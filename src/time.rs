pub type Hertz = fugit::HertzU32;
pub type Micros = fugit::MicrosDurationU32;
pub type Millis = fugit::MillisDurationU32;

pub use fugit::{ExtU32, RateExtU32};
