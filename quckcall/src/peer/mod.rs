pub mod loopback;
pub mod sdp;

mod link;
mod manager;
mod platform;

pub use link::*;
pub use manager::*;
pub use platform::*;
pub use sdp::QualityPolicy;
