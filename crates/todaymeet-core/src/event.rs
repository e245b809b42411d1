//! Calendar event model.
//!
//! Events come back from the calendar API already rendered in the time zone
//! requested through the `Prefer: outlook.timezone` header, so an
//! [`EventTime`] keeps the provider's local wall-clock value together with the
//! zone name rather than converting to UTC.

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Wall-clock time of an event boundary, in a named time zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    /// Local date and time.
    pub date_time: NaiveDateTime,
    /// IANA or Windows zone name reported by the provider.
    pub time_zone: String,
}

impl EventTime {
    /// Creates an event time.
    pub fn new(date_time: NaiveDateTime, time_zone: impl Into<String>) -> Self {
        Self {
            date_time,
            time_zone: time_zone.into(),
        }
    }

    /// Parses the provider's `dateTime` representation.
    ///
    /// Accepts fractional seconds of any precision
    /// (`2024-03-15T10:00:00.0000000`) as well as whole seconds.
    pub fn parse(date_time: &str, time_zone: impl Into<String>) -> Option<Self> {
        let parsed = NaiveDateTime::parse_from_str(date_time, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        Some(Self::new(parsed, time_zone))
    }

    /// The calendar date of this boundary.
    pub fn date(&self) -> NaiveDate {
        self.date_time.date()
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date_time
            .cmp(&other.date_time)
            .then_with(|| self.time_zone.cmp(&other.time_zone))
    }
}

/// A calendar event as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Provider identifier.
    pub id: String,
    /// Event title. Empty when the provider hides it.
    pub subject: String,
    /// Start boundary.
    pub start: EventTime,
    /// End boundary.
    pub end: EventTime,
    /// Whether this is an all-day event.
    #[serde(default)]
    pub is_all_day: bool,
    /// Online meeting join URL, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_url: Option<String>,
    /// Link to the event in the provider's web UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_link: Option<String>,
    /// Display name of the location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Organizer display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
}

impl Event {
    /// Creates an event with the required fields.
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        start: EventTime,
        end: EventTime,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            start,
            end,
            is_all_day: false,
            join_url: None,
            web_link: None,
            location: None,
            organizer: None,
        }
    }

    /// Builder: set the join URL.
    pub fn with_join_url(mut self, url: impl Into<String>) -> Self {
        self.join_url = Some(url.into());
        self
    }

    /// Builder: mark as all-day.
    pub fn with_all_day(mut self, all_day: bool) -> Self {
        self.is_all_day = all_day;
        self
    }

    /// Returns true if the event can be joined online.
    pub fn is_joinable(&self) -> bool {
        self.join_url.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Uppercased first character of the subject, used as an avatar glyph.
    pub fn initial(&self) -> Option<char> {
        self.subject.chars().next().and_then(|c| c.to_uppercase().next())
    }
}

/// Sorts events by start, then end, then id.
///
/// The sort is stable, so events the provider already ordered keep their
/// relative order when boundaries tie.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.end.cmp(&b.end))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> EventTime {
        EventTime::parse(s, "UTC").unwrap()
    }

    #[test]
    fn parses_seven_digit_fractions() {
        let t = EventTime::parse("2024-03-15T10:00:00.0000000", "Europe/Paris").unwrap();
        assert_eq!(t.date_time.to_string(), "2024-03-15 10:00:00");
        assert_eq!(t.time_zone, "Europe/Paris");
    }

    #[test]
    fn parses_whole_seconds() {
        assert!(EventTime::parse("2024-03-15T10:00:00", "UTC").is_some());
        assert!(EventTime::parse("not a date", "UTC").is_none());
    }

    #[test]
    fn sorting_orders_by_start_then_end() {
        let mut events = vec![
            Event::new("c", "Late", at("2024-03-15T15:00:00"), at("2024-03-15T16:00:00")),
            Event::new("b", "Long", at("2024-03-15T09:00:00"), at("2024-03-15T11:00:00")),
            Event::new("a", "Short", at("2024-03-15T09:00:00"), at("2024-03-15T09:30:00")),
        ];
        sort_events(&mut events);
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn joinable_requires_non_empty_url() {
        let base = Event::new("1", "sync", at("2024-03-15T09:00:00"), at("2024-03-15T09:30:00"));
        assert!(!base.is_joinable());
        assert!(!base.clone().with_join_url("").is_joinable());
        assert!(base.with_join_url("https://teams.example/join/1").is_joinable());
    }

    #[test]
    fn initial_is_uppercased() {
        let e = Event::new("1", "standup", at("2024-03-15T09:00:00"), at("2024-03-15T09:15:00"));
        assert_eq!(e.initial(), Some('S'));
        let empty = Event::new("2", "", at("2024-03-15T09:00:00"), at("2024-03-15T09:15:00"));
        assert_eq!(empty.initial(), None);
    }

    #[test]
    fn serializes_camel_case_without_empty_optionals() {
        let e = Event::new("1", "Standup", at("2024-03-15T09:00:00"), at("2024-03-15T09:15:00"))
            .with_join_url("https://teams.example/join/1");
        insta::assert_json_snapshot!(e, @r#"
        {
          "id": "1",
          "subject": "Standup",
          "start": {
            "dateTime": "2024-03-15T09:00:00",
            "timeZone": "UTC"
          },
          "end": {
            "dateTime": "2024-03-15T09:15:00",
            "timeZone": "UTC"
          },
          "isAllDay": false,
          "joinUrl": "https://teams.example/join/1"
        }
        "#);
    }
}
