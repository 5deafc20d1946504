mod pending;
mod session;
mod types;

pub use pending::*;
pub use session::*;
pub use types::*;
