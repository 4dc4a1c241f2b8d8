//! Database models for notify-platform.
//!
//! These models map directly to the database schema.

pub mod audit;
pub mod notification;
pub mod rate_limit;

pub use audit::*;
pub use notification::*;
pub use rate_limit::*;
