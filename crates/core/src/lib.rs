// crates/core/src/lib.rs
pub mod error;
pub mod generation;
pub mod types;

pub use error::*;
pub use types::*;
