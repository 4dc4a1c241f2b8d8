//! HTTP API: authenticated submission, history, stats and audit endpoints.

pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use jwt::{Claims, JwtService};
pub use server::{ApiServer, ApiServerConfig, AppState};
