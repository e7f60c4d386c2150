//! Types shared by the stock portal crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
