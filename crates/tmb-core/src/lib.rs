//! tmb-core: shared record types, request contracts, configuration and errors
//! for the TinyMotion backend.

pub mod config;
pub mod error;
pub mod types;

pub use error::{TmbError, TmbResult};
pub use types::{Patch, Sha256Hex};
