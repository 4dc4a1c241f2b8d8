//! Per-delivery state machine.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Where a single delivery is in its handling.
///
/// ```text
/// Received -> Parsed -> Delivering -> Delivered
///    |           |           \-----> TransientFailure
///    |           \--(already sent)-> Delivered
///    \-----(malformed)------------> PermanentFailure
/// ```
///
/// `Parsed` may also go straight to `TransientFailure` when the ledger cannot
/// be read, and to `PermanentFailure` when the id is unknown.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Received,
    Parsed,
    Delivering,
    Delivered,
    TransientFailure,
    PermanentFailure,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::TransientFailure | Self::PermanentFailure
        )
    }

    pub fn can_transition_to(&self, target: DeliveryState) -> bool {
        use DeliveryState::*;
        matches!(
            (self, target),
            (Received, Parsed)
                | (Received, PermanentFailure)
                | (Parsed, Delivering)
                | (Parsed, Delivered)
                | (Parsed, TransientFailure)
                | (Parsed, PermanentFailure)
                | (Delivering, Delivered)
                | (Delivering, TransientFailure)
                | (Delivering, PermanentFailure)
        )
    }

    pub fn transition_to(&mut self, target: DeliveryState) -> Result<()> {
        if !self.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        *self = target;
        Ok(())
    }
}

/// How the broker message was settled once handling finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Settlement {
    Acked,
    Requeued,
    Dropped,
}

impl Settlement {
    /// Broker action implied by a terminal state.
    pub fn for_state(state: DeliveryState) -> Option<Self> {
        match state {
            DeliveryState::Delivered => Some(Self::Acked),
            DeliveryState::TransientFailure => Some(Self::Requeued),
            DeliveryState::PermanentFailure => Some(Self::Dropped),
            _ => None,
        }
    }
}
