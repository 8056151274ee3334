#[cfg(test)]
#[macro_use]
mod testing;

pub mod blob;
pub use crate::blob::*;

pub mod checker;
pub use crate::checker::*;

pub mod config;
pub use crate::config::*;

pub mod coordinator;
pub use crate::coordinator::*;

pub mod core;
pub use crate::core::*;

pub mod error;
pub use crate::error::*;

pub mod fetcher;
pub use crate::fetcher::*;

pub mod injector;
pub use crate::injector::*;

pub mod loader;
pub use crate::loader::*;

pub mod memory;
pub use crate::memory::*;

pub mod object_kv;
pub use crate::object_kv::*;

pub mod parser;
pub use crate::parser::*;

pub mod retry;
pub use crate::retry::*;

pub mod sled_store;
pub use crate::sled_store::*;

pub mod store;
pub use crate::store::*;

pub mod unzip;
pub use crate::unzip::*;
