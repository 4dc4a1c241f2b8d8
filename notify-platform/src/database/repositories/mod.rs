//! Repository layer for database access.

pub mod audit;
pub mod notification;
pub mod rate_limit;

pub use audit::*;
pub use notification::*;
pub use rate_limit::*;
