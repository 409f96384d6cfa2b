//! The armi sync engine.
//!
//! One cycle per target (`arch/branch`) runs the same pipeline:
//!
//! 1. fetch and parse the repository index ([`armi_registry`]),
//! 2. inspect the live directory ([`state`]) and diff it against the index
//!    ([`reconcile`]),
//! 3. download what is missing into a private staging directory
//!    ([`fetch`], [`staging`]),
//! 4. move the verified files into place and replace the index
//!    ([`publish`]).
//!
//! [`sync::Syncer`] drives the cycles and decides what is published when
//! some packages could not be fetched.

pub mod audit;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod publish;
pub mod reconcile;
pub mod staging;
pub mod state;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{ArmiError, ErrorContext, PublishError, Result};
