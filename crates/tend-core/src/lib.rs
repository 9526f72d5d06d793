//! Core types and trait definitions for Tend, a shared care-coordination
//! backend.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! permission evaluator, conflict resolver and presence state machine live
//! here as pure functions so every other crate shares one set of rules.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod activity;
pub mod audit;
pub mod clock;
pub mod conflict;
pub mod dependent;
pub mod error;
pub mod group;
pub mod invitation;
pub mod membership;
pub mod permission;
pub mod presence;
pub mod store;

pub use error::{Error, Result};
