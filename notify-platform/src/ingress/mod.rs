//! Notification ingress: request validation and the submit path.

pub mod publisher;
pub mod request;

pub use publisher::{Ingress, IngressTimeouts, SubmitError, SubmitReceipt};
pub use request::{FieldError, MAX_SUBJECT_CHARS, NotifyRequest, ValidatedRequest};
