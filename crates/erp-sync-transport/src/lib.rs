//! Transports for erp-sync: a thin REST client and a scripted in-memory
//! backend used by the simulator and the test suites.

mod error;
mod memory;
mod rest;

pub use error::SetupError;
pub use memory::{MemoryBackend, WriteCall};
pub use rest::{RestClient, RestResource};
