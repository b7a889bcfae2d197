//! Error plumbing shared by the autopilot crates.

pub mod error;

pub use error::FromMessage;
