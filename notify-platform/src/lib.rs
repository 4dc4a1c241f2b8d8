//! notify-platform library crate.
//!
//! Rate-limited admission of notification requests, a durable broker hand-off
//! and per-channel delivery workers. The two binaries (`notify-service` and
//! `notify-worker`) are thin wiring over the modules here.

pub mod api;
pub mod audit;
pub mod broker;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod health;
pub mod ingress;
pub mod logging;
pub mod panic_hook;
pub mod ratelimit;
pub mod utils;
pub mod worker;

pub use error::{Error, Result};
