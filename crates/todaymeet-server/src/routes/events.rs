//! Calendar read handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use todaymeet_core::{Event, TimeRange};
use todaymeet_providers::microsoft::is_valid_time_zone;

use super::current_session;
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// `?start&end&tz`
///
/// `start` and `end` are RFC 3339 instants or `YYYY-MM-DD` dates (midnight
/// UTC). A lone `start` means that whole day; no bounds means the current UTC
/// day.
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub tz: Option<String>,
}

impl RangeQuery {
    fn range(&self, now: DateTime<Utc>) -> ServerResult<TimeRange> {
        match (self.start.as_deref(), self.end.as_deref()) {
            (None, None) => Ok(TimeRange::day_of(now)),
            (Some(start), None) => Ok(TimeRange::day_of(parse_bound(start)?)),
            (None, Some(_)) => Err(ServerError::bad_request("end given without start")),
            (Some(start), Some(end)) => TimeRange::new(parse_bound(start)?, parse_bound(end)?)
                .map_err(|e| ServerError::bad_request(e.to_string())),
        }
    }

    fn time_zone(&self, default: &str) -> ServerResult<String> {
        let tz = self.tz.as_deref().unwrap_or(default);
        if !is_valid_time_zone(tz) {
            return Err(ServerError::bad_request("invalid time zone"));
        }
        Ok(tz.to_string())
    }
}

fn parse_bound(value: &str) -> ServerResult<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|_| ServerError::bad_request(format!("invalid date `{}`", value)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub range: TimeRange,
    pub time_zone: String,
    pub events: Vec<Event>,
}

/// GET /api/events
pub async fn my_events(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<RangeQuery>,
) -> ServerResult<Json<EventsResponse>> {
    let range = query.range(Utc::now())?;
    let time_zone = query.time_zone(&state.web.default_time_zone)?;
    let (_, session) = current_session(&state, &jar).ok_or(ServerError::NotAuthenticated)?;

    let events = session.fetch_events(range, &time_zone).await?;
    Ok(Json(EventsResponse {
        range,
        time_zone,
        events,
    }))
}

/// GET /api/users/{user_id}/events
///
/// Read with the application token; the caller still needs a signed-in
/// session.
pub async fn user_events(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(user_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> ServerResult<Json<EventsResponse>> {
    let app_tokens = state.app_tokens.clone().ok_or(ServerError::NotFound)?;
    let range = query.range(Utc::now())?;
    let time_zone = query.time_zone(&state.web.default_time_zone)?;

    let signed_in = current_session(&state, &jar)
        .is_some_and(|(_, session)| session.status().is_authenticated);
    if !signed_in {
        return Err(ServerError::NotAuthenticated);
    }

    let events = app_tokens
        .fetch_user_events(&user_id, range, &time_zone)
        .await?;
    Ok(Json(EventsResponse {
        range,
        time_zone,
        events,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn query(start: Option<&str>, end: Option<&str>) -> RangeQuery {
        RangeQuery {
            start: start.map(str::to_string),
            end: end.map(str::to_string),
            tz: None,
        }
    }

    #[test]
    fn range_defaults_to_current_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 13, 45, 0).unwrap();
        let range = query(None, None).range(now).unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap());
    }

    #[test]
    fn range_accepts_dates_and_instants() {
        let now = Utc::now();
        let day = query(Some("2024-03-15"), None).range(now).unwrap();
        assert_eq!(day, TimeRange::day(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()));

        let span = query(Some("2024-03-15T08:00:00+01:00"), Some("2024-03-15T12:00:00Z"))
            .range(now)
            .unwrap();
        assert_eq!(span.start, Utc.with_ymd_and_hms(2024, 3, 15, 7, 0, 0).unwrap());
    }

    #[test]
    fn bad_ranges_are_rejected() {
        let now = Utc::now();
        assert!(query(None, Some("2024-03-15")).range(now).is_err());
        assert!(query(Some("yesterday"), None).range(now).is_err());
        assert!(query(Some("2024-03-16"), Some("2024-03-15")).range(now).is_err());
    }

    #[test]
    fn time_zone_falls_back_and_is_validated() {
        let mut q = RangeQuery::default();
        assert_eq!(q.time_zone("Europe/Paris").unwrap(), "Europe/Paris");
        q.tz = Some("Pacific Standard Time".to_string());
        assert_eq!(q.time_zone("UTC").unwrap(), "Pacific Standard Time");
        q.tz = Some("UTC\"\r\nX-Injected: 1".to_string());
        assert!(q.time_zone("UTC").is_err());
    }
}
