//! Core types for subcal.
//!
//! This crate turns a user's active subscriptions into an ICS feed:
//! - `subscription` holds the typed records a store produces
//! - `normalize` derives display-ready events from those records
//! - `ics` renders events into a calendar document
//! - `store` defines the store capability and its SQLite implementation

pub mod error;
pub mod ics;
pub mod normalize;
pub mod store;
pub mod subscription;

pub use error::{SkipReason, SubcalError, SubcalResult};
pub use ics::{CalendarMeta, FeedWriter, empty_feed, generate_feed};
pub use normalize::{Alarm, FeedEvent, normalize, normalize_all};
pub use store::{SqliteStore, SubscriptionStore};
pub use subscription::{FeedOptions, MainCurrency, SubscriptionRecord, User};
