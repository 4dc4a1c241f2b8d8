//! Channel workers.
//!
//! One worker process per channel consumes that channel's queue, runs each
//! delivery through the [`DeliveryHandler`] state machine and settles it with
//! the broker.

pub mod handler;
pub mod runner;
pub mod state;
pub mod transport;
pub mod transports;

pub use handler::{DeliveryHandler, HandleReport};
pub use runner::{ChannelWorker, WorkerStats};
pub use state::{DeliveryState, Settlement};
pub use transport::{DeliveryError, Transport};
