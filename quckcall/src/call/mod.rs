mod engine;
mod event;
mod handle;
mod listener;
mod state;

pub use engine::*;
pub use event::*;
pub use handle::*;
pub use listener::*;
pub use state::*;
