//! ICS feed generation.
//!
//! This module writes subscription feeds according to RFC 5545.

mod generate;

pub use generate::{CalendarMeta, FeedWriter, empty_feed, generate_feed};
