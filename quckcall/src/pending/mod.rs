mod background;
mod store;

pub use background::*;
pub use store::*;
