//! The coordination layer of Tend.
//!
//! [`Hub`] owns the write path: every operation is authorised by the
//! permission evaluator, persisted through a [`tend_core::store::CareStore`],
//! reconciled by the conflict resolver under a per-dependent lock, and then
//! fanned out to live subscribers with each recipient's visibility filter
//! applied at delivery time.
//!
//! Presence is kept in memory only. Broadcast delivery is at-most-once and
//! never affects the outcome of a committed write.

mod activity;
mod groups;
mod hub;
mod invitations;
mod locks;
mod members;
mod presence;
mod publish;
mod retry;

pub mod broadcast;
pub mod config;
pub mod error;
pub mod notify;
pub mod token;

pub use activity::{DependentOverview, Export, FeedQuery, LoggedActivity};
pub use broadcast::{ActivityChange, Notification, Subscription};
pub use config::{HubConfig, RetryConfig};
pub use error::{Error, ErrorKind, Result};
pub use hub::Hub;
pub use invitations::IssuedInvitation;
pub use notify::{LogNotifier, Notifier};

#[cfg(test)]
mod tests;
