//! The outgoing multi-part payment engine: an
//! [`OutgoingPaymentMaster`](master::OutgoingPaymentMaster) that owns the
//! local channel registry and path-finder mutex, supervising one
//! [`OutgoingPaymentSender`](sender::OutgoingPaymentSender) per in-flight
//! payment tag.

pub mod config;
pub mod error;
pub mod iface;
pub mod master;
pub mod model;
pub mod sender;
