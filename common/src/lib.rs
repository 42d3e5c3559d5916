//! The `common` crate contains types and functionality shared between the
//! gossip sync engine and the outgoing payment engine that live in `lexe-ln`.
//!
//! This crate intentionally carries only the cross-cutting concerns those two
//! subsystems need: task spawning, shutdown signaling, backoff, randomness,
//! time, and the small set of Lightning/Bitcoin newtypes that show up in both
//! the gossip and payment data models.

// `proptest_derive::Arbitrary` issue. This will hard-error for edition 2024 so
// hopefully it gets fixed soon...
// See: <https://github.com/proptest-rs/proptest/issues/447>
#![allow(non_local_definitions)]

pub use secrecy::{ExposeSecret, Secret};

/// User / node id-like types: [`api::user::NodePk`], [`api::user::Scid`].
pub mod api;
/// Exponential backoff.
pub mod backoff;
/// Application-level constants.
pub mod constants;
/// [`Iterator`] extension trait, incl. strict-total-order checks.
pub mod iter;
/// Bitcoin / Lightning Lexe newtypes shared by the gossip and payment models.
pub mod ln;
/// Random number generation.
pub mod rng;
/// serde helpers for hex-encoded bytes.
pub mod serde_helpers;
/// sha256 convenience module.
pub mod sha256;
/// `ShutdownChannel`.
pub mod shutdown;
/// `LxTask`.
pub mod task;
/// `TestEvent`, for deterministic integration tests.
pub mod test_event;
/// `TimestampMillis`.
pub mod time;

/// Feature-gated test utilities that can be shared across crate boundaries.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Assert at compile time that a boolean expression evaluates to true.
/// Implementation copied from the static_assertions crate.
#[macro_export]
macro_rules! const_assert {
    ($x:expr $(,)?) => {
        #[allow(clippy::const_is_empty, clippy::eq_op, unknown_lints)]
        const _: [(); 0 - !{
            const CONST_ASSERT: bool = $x;
            CONST_ASSERT
        } as usize] = [];
    };
}

/// A trait which allows us to apply functions (including tuple enum variants)
/// to non-[`Iterator`]/[`Result`]/[`Option`] values for cleaner iterator-like
/// chains. It exposes an [`apply`] method and is implemented for all `T`.
///
/// [`apply`]: Self::apply
pub trait Apply<F, T> {
    fn apply(self, f: F) -> T;
}

impl<F, T, U> Apply<F, U> for T
where
    F: FnOnce(T) -> U,
{
    #[inline]
    fn apply(self, f: F) -> U {
        f(self)
    }
}
