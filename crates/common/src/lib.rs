//! Shared types for the Property237 client workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
