#![forbid(unsafe_code)]

mod backfill;
mod config;
mod controller;
mod dumper;
mod enrich;
mod error;
mod identifier;
mod index;
mod jsonl;
mod loader;
mod pipeline;
mod record;
mod staging;
mod stats;
mod validate;

pub mod schema;
pub mod transform;

pub use backfill::*;
pub use config::*;
pub use controller::*;
pub use dumper::*;
pub use enrich::*;
pub use error::*;
pub use identifier::*;
pub use index::*;
pub use jsonl::*;
pub use loader::*;
pub use pipeline::*;
pub use record::*;
pub use staging::*;
pub use stats::*;
pub use validate::*;

pub use keyshift_store as store;
