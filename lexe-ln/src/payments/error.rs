//! User/protocol-facing error taxonomy for outgoing payments.
//!
//! Mirrors the two-tier split used throughout the crate: these are
//! `thiserror`-derived, `serde`-serializable, stable-`Display` enums for
//! conditions a caller needs to branch on, as opposed to the `anyhow::Error`
//! chains used for internal plumbing bugs.

use serde::{Deserialize, Serialize};

use crate::payments::model::{PaymentFailureReason, RemoteFailureOutcome};

/// The terminal outcome of one outbound payment attempt.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum PaymentError {
    #[error("no-routes-found")]
    NoRoutesFound,
    #[error("not-enough-funds")]
    NotEnoughFunds,
    #[error("payment-not-sendable")]
    PaymentNotSendable,
    #[error("run-out-of-retry-attempts")]
    RunOutOfRetryAttempts,
    #[error("run-out-of-capable-channels")]
    RunOutOfCapableChannels,
    #[error("node-could-not-parse-onion")]
    NodeCouldNotParseOnion,
    #[error("not-retrying-no-details")]
    NotRetryingNoDetails,
    #[error("timed-out")]
    TimedOut,
    /// The decrypted BOLT 4 failure message intact, or a marker that
    /// decryption failed.
    #[error("remote failure")]
    Remote(RemoteFailureOutcome),
}

impl From<RemoteFailureOutcome> for PaymentError {
    fn from(outcome: RemoteFailureOutcome) -> Self {
        Self::Remote(outcome)
    }
}

impl From<PaymentFailureReason> for PaymentError {
    fn from(reason: PaymentFailureReason) -> Self {
        match reason {
            PaymentFailureReason::NoRoutesFound => Self::NoRoutesFound,
            PaymentFailureReason::NotEnoughFunds => Self::NotEnoughFunds,
            PaymentFailureReason::PaymentNotSendable => Self::PaymentNotSendable,
            PaymentFailureReason::RunOutOfRetryAttempts => Self::RunOutOfRetryAttempts,
            PaymentFailureReason::RunOutOfCapableChannels => Self::RunOutOfCapableChannels,
            PaymentFailureReason::NodeCouldNotParseOnion => Self::NodeCouldNotParseOnion,
            PaymentFailureReason::NotRetryingNoDetails => Self::NotRetryingNoDetails,
            PaymentFailureReason::TimedOut => Self::TimedOut,
            PaymentFailureReason::Remote(outcome) => Self::Remote(outcome),
        }
    }
}
