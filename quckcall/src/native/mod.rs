mod bridge;
mod telephony;

pub use bridge::*;
pub use telephony::*;
