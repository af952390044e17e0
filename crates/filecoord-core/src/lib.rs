//! Core types and contracts for the file-storage coordination layer.

pub mod error;
pub mod hooks;
pub mod io;
pub mod prelude;
pub mod request;
pub mod transport;

pub use error::{CoordError, CoordResult};
pub use prelude::*;
