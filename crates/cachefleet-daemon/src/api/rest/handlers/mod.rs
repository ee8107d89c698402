//! API request handlers

mod health;
mod runtimes;

pub use health::*;
pub use runtimes::*;
