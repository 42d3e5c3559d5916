//! Identifier newtypes referenced by both the gossip and payment data models.

/// `NodePk`, `Scid`.
pub mod user;

pub use user::{NodePk, Scid};
