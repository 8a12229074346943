#![forbid(unsafe_code)]

mod codec;
mod engine;
mod error;
mod store;

pub use codec::*;
pub use engine::*;
pub use error::*;
pub use store::*;
