//! Rate limiting: policy resolution, atomic quota counters and the admission
//! gate that composes them.

pub mod clock;
pub mod counter;
pub mod gate;
pub mod resolver;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{Admission, InMemoryQuotaCounter, QuotaCounter, RedisQuotaCounter};
pub use gate::{AdmissionDecision, AdmissionGate};
pub use resolver::RateLimitResolver;
