//! Data models

mod host;

pub use host::*;
