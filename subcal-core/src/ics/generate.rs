//! ICS feed generation.

use std::borrow::Cow;

use chrono::{Duration, NaiveDate};
use icalendar::{
    Alarm, Calendar, Component, EventLike, EventStatus, Property, Trigger, ValueType,
};

use crate::normalize::FeedEvent;

/// Calendar-level identity written into the feed header and summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarMeta {
    /// Used in PRODID and as the SUMMARY prefix
    pub product_name: String,
    /// NAME / X-WR-CALNAME
    pub calendar_name: String,
}

impl Default for CalendarMeta {
    fn default() -> Self {
        CalendarMeta {
            product_name: "Subcal".to_string(),
            calendar_name: "Subcal".to_string(),
        }
    }
}

impl CalendarMeta {
    fn prodid(&self) -> String {
        format!("-//{}//iCalendar//EN", self.product_name)
    }
}

/// Incremental feed writer.
///
/// Events are added to the calendar as they arrive, in order, and
/// [`FeedWriter::finish`] renders the document. A writer finished without
/// any events yields the header and footer only.
pub struct FeedWriter<'a> {
    meta: &'a CalendarMeta,
    calendar: Calendar,
    events: usize,
}

impl<'a> FeedWriter<'a> {
    pub fn new(meta: &'a CalendarMeta) -> Self {
        let mut calendar = Calendar::new();
        calendar.name(&meta.calendar_name);

        FeedWriter {
            meta,
            calendar,
            events: 0,
        }
    }

    /// Append one VEVENT with its VALARM.
    pub fn push_event(&mut self, event: &FeedEvent) {
        let mut ics_event = icalendar::Event::new();
        ics_event.uid(&event.uid);
        ics_event.summary(&format!(
            "{}: {}",
            self.meta.product_name,
            unify_line_breaks(&event.name)
        ));
        ics_event.description(&description(event));

        // All-day, single-day marker
        add_date_property(&mut ics_event, "DTSTART", event.date);
        add_date_property(&mut ics_event, "DTEND", event.date);

        ics_event.location(&unify_line_breaks(&event.location));
        ics_event.status(EventStatus::Confirmed);
        ics_event.add_property("TRANSP", "OPAQUE");

        let lead = Duration::days(i64::from(event.alarm.lead_days));
        let mut alarm = Alarm::display("Reminder", Trigger::before_start(lead));
        // chrono renders durations in seconds, keep the day form
        alarm.add_property("TRIGGER", event.alarm.trigger());
        ics_event.alarm(alarm);

        self.calendar.push(ics_event.done());
        self.events += 1;
    }

    /// Number of events written so far.
    pub fn event_count(&self) -> usize {
        self.events
    }

    /// Render the document.
    pub fn finish(mut self) -> String {
        let calendar = self.calendar.done();
        strip_ics_bloat(&calendar.to_string(), &self.meta.prodid())
    }
}

/// Generate a complete feed from normalized events, preserving their order.
pub fn generate_feed<'e, I>(meta: &CalendarMeta, events: I) -> String
where
    I: IntoIterator<Item = &'e FeedEvent>,
{
    let mut writer = FeedWriter::new(meta);
    for event in events {
        writer.push_event(event);
    }
    writer.finish()
}

/// Header and footer only.
///
/// Served when there is nothing to list, including when the records could
/// not be fetched at all.
pub fn empty_feed(meta: &CalendarMeta) -> String {
    FeedWriter::new(meta).finish()
}

/// Labeled segments on separate lines, written as `\n` escapes.
fn description(event: &FeedEvent) -> String {
    event
        .description_segments()
        .iter()
        .map(|(label, value)| format!("{}: {}", label, unify_line_breaks(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turn every line break form into a plain `\n` before TEXT escaping.
///
/// CRLF and lone CR become LF. A literal backslash-n is already the
/// escaped form of a line break and is kept as one rather than having its
/// backslash escaped.
fn unify_line_breaks(value: &str) -> Cow<'_, str> {
    if !value.contains(['\r', '\\']) {
        return Cow::Borrowed(value);
    }

    Cow::Owned(
        value
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .replace("\\n", "\n"),
    )
}

fn add_date_property(ics_event: &mut icalendar::Event, name: &str, date: NaiveDate) {
    let mut prop = Property::new(name, date.format("%Y%m%d").to_string());
    prop.append_parameter(ValueType::Date);
    ics_event.append_property(prop);
}

/// Clean up ICS output from the icalendar crate
/// - Replace PRODID with the product identifier
/// - Remove CALSCALE:GREGORIAN (it's the default)
/// - Remove DTSTAMP, the feed only changes when the subscriptions do
/// - Remove UID inside VALARM sections (not required by RFC 5545)
fn strip_ics_bloat(ics: &str, prodid: &str) -> String {
    let mut result = String::with_capacity(ics.len());
    let mut in_valarm = false;

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:");
            result.push_str(prodid);
            result.push_str("\r\n");
            continue;
        }

        if line == "CALSCALE:GREGORIAN" || line.starts_with("DTSTAMP:") {
            continue;
        }

        if line == "BEGIN:VALARM" {
            in_valarm = true;
        } else if line == "END:VALARM" {
            in_valarm = false;
        }

        if in_valarm && line.starts_with("UID:") {
            continue;
        }

        result.push_str(line);
        result.push_str("\r\n");
    }

    result
}
