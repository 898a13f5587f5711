//! Store-facing record types.
//!
//! These are populated by a [`SubscriptionStore`](crate::store::SubscriptionStore)
//! and consumed read-only by the normalizer. Fields that the schema marks
//! required are still `Option`s here: a damaged row must be skippable
//! without failing the whole feed.

use rust_decimal::Decimal;

/// A user resolved from an API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    /// Currency id the user reports in
    pub main_currency: Option<i64>,
}

/// One active subscription, joined with its display names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionRecord {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub price: Option<Decimal>,

    // Currency
    pub currency_id: Option<i64>,
    pub currency_symbol: String,
    /// Rate of this currency against the user's main currency
    pub currency_rate: Option<Decimal>,

    // Display names from joined tables
    pub category_name: String,
    pub payment_method_name: String,
    pub payer_name: String,

    pub notes: Option<String>,
    pub url: Option<String>,

    /// Raw stored date text, parsed during normalization
    pub next_payment: Option<String>,
    pub notify_days_before: Option<i64>,
    pub inactive: bool,
}

/// Per-request feed options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOptions {
    pub convert_currency: bool,
}

/// Target currency for converted prices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainCurrency {
    pub id: i64,
    pub symbol: String,
}
