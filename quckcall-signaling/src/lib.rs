pub mod codec;

mod error;
mod hub;
mod id;
mod message;
mod transport;

pub use error::*;
pub use hub::*;
pub use id::*;
pub use message::*;
pub use transport::*;
