//! Subscription record normalization.
//!
//! Turns a [`SubscriptionRecord`] from the store into a [`FeedEvent`]: a
//! display-ready value object with the price formatted, the payment date
//! parsed and the reminder lead time resolved. ICS escaping happens later,
//! when the event is rendered.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SkipReason;
use crate::subscription::{MainCurrency, SubscriptionRecord};

/// Lead time used when a record has no usable reminder preference.
pub const DEFAULT_LEAD_DAYS: u32 = 1;

/// A subscription's next charge, ready to be rendered as a VEVENT.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub uid: String,
    pub name: String,
    /// Price with exactly two decimals, e.g. `9.00`
    pub price: String,
    pub currency_symbol: String,
    pub category: String,
    pub payment_method: String,
    pub payer: String,
    /// Empty when the record has no notes
    pub notes: String,
    /// Empty when the record has no URL
    pub location: String,
    /// All-day start and end date
    pub date: NaiveDate,
    pub alarm: Alarm,
}

/// Display reminder attached to each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alarm {
    /// Days before the event start
    pub lead_days: u32,
}

impl Alarm {
    /// TRIGGER value, a negative duration relative to the event start.
    pub fn trigger(&self) -> String {
        format!("-P{}D", self.lead_days)
    }
}

impl FeedEvent {
    /// Labeled description segments, in display order.
    ///
    /// Values are unescaped; the renderer escapes each one and joins them
    /// with the `\n` text escape.
    pub fn description_segments(&self) -> [(&'static str, String); 5] {
        [
            ("Price", format!("{}{}", self.currency_symbol, self.price)),
            ("Category", self.category.clone()),
            ("Payment Method", self.payment_method.clone()),
            ("Payer", self.payer.clone()),
            ("Notes", self.notes.clone()),
        ]
    }
}

/// Normalize one record.
///
/// When `conversion` is given, the price is converted into that currency
/// using the record's exchange rate.
pub fn normalize(
    record: &SubscriptionRecord,
    conversion: Option<&MainCurrency>,
) -> Result<FeedEvent, SkipReason> {
    record.id.ok_or(SkipReason::MissingField("id"))?;
    let name = record.name.as_deref().ok_or(SkipReason::MissingField("name"))?;
    let price = record.price.ok_or(SkipReason::MissingField("price"))?;
    let raw_date = record
        .next_payment
        .as_deref()
        .ok_or(SkipReason::MissingField("next_payment"))?;

    if price.is_sign_negative() && !price.is_zero() {
        return Err(SkipReason::NegativePrice(price.to_string()));
    }

    let date =
        parse_payment_date(raw_date).ok_or_else(|| SkipReason::InvalidDate(raw_date.to_string()))?;

    let (price, currency_symbol) = match conversion {
        Some(main) => convert_price(record, price, main),
        None => (price, record.currency_symbol.clone()),
    };

    Ok(FeedEvent {
        uid: Uuid::new_v4().to_string(),
        name: name.to_string(),
        price: format_price(price),
        currency_symbol,
        category: record.category_name.clone(),
        payment_method: record.payment_method_name.clone(),
        payer: record.payer_name.clone(),
        notes: record.notes.clone().unwrap_or_default(),
        location: record.url.clone().unwrap_or_default(),
        date,
        alarm: Alarm {
            lead_days: lead_days(record.notify_days_before),
        },
    })
}

/// Normalize records in order, dropping (and logging) the ones that fail.
pub fn normalize_all<'a, I>(
    records: I,
    conversion: Option<&'a MainCurrency>,
) -> impl Iterator<Item = FeedEvent> + 'a
where
    I: IntoIterator<Item = &'a SubscriptionRecord>,
    I::IntoIter: 'a,
{
    records
        .into_iter()
        .filter_map(move |record| match normalize(record, conversion) {
            Ok(event) => Some(event),
            Err(reason) => {
                warn!(subscription_id = ?record.id, %reason, "Skipping subscription in feed");
                None
            }
        })
}

/// Resolve the reminder lead time in days.
///
/// Zero and absent both mean "no preference" and fall back to
/// [`DEFAULT_LEAD_DAYS`]. Negative values are clamped the same way.
pub fn lead_days(notify_days_before: Option<i64>) -> u32 {
    match notify_days_before {
        Some(days) if days > 0 => u32::try_from(days).unwrap_or(u32::MAX),
        Some(days) if days < 0 => {
            warn!(days, "Negative reminder lead time, using default");
            DEFAULT_LEAD_DAYS
        }
        _ => DEFAULT_LEAD_DAYS,
    }
}

/// Fixed-point, two decimals, no grouping: `9` -> `9.00`, `12.5` -> `12.50`.
pub fn format_price(price: Decimal) -> String {
    let mut rounded = price.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// Parse a stored payment date.
///
/// Accepts `YYYY-MM-DD`, `YYYYMMDD`, `YYYY-MM-DD HH:MM:SS` and RFC 3339.
/// Only the calendar date is kept.
pub fn parse_payment_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

fn convert_price(
    record: &SubscriptionRecord,
    price: Decimal,
    main: &MainCurrency,
) -> (Decimal, String) {
    if record.currency_id == Some(main.id) {
        return (price, record.currency_symbol.clone());
    }

    match record.currency_rate {
        Some(rate) if rate > Decimal::ZERO => match price.checked_div(rate) {
            Some(converted) => (converted, main.symbol.clone()),
            None => {
                warn!(
                    subscription_id = ?record.id,
                    %price,
                    %rate,
                    "Converted price out of range, keeping original currency"
                );
                (price, record.currency_symbol.clone())
            }
        },
        _ => {
            debug!(
                subscription_id = ?record.id,
                currency_id = ?record.currency_id,
                "No usable exchange rate, keeping original currency"
            );
            (price, record.currency_symbol.clone())
        }
    }
}
