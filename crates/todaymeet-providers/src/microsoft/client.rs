//! Microsoft Graph calendar client.
//!
//! Reads `calendarView`, which expands recurring series into occurrences for
//! the requested window. Times come back rendered in the zone named by the
//! `Prefer: outlook.timezone` header.

use reqwest::StatusCode;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use todaymeet_core::{Event, EventTime, TimeRange, sort_events};
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{BoxFuture, CalendarFetcher};
use crate::tokens::AccessToken;

use super::config::CalendarConfig;

/// Fields requested from Graph for each event.
const SELECT_FIELDS: &str =
    "id,subject,start,end,isAllDay,isCancelled,onlineMeeting,webLink,location,organizer";

/// Returns true if `tz` is safe to place in the `Prefer` header.
///
/// Accepts IANA names (`Europe/Paris`, `Etc/GMT+2`) and Windows names
/// (`Pacific Standard Time`).
pub fn is_valid_time_zone(tz: &str) -> bool {
    !tz.is_empty()
        && tz.len() <= 64
        && tz
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+' | ' ' | '.'))
}

/// Client for the Graph calendar endpoints.
#[derive(Debug, Clone)]
pub struct GraphCalendarClient {
    config: CalendarConfig,
    http: reqwest::Client,
}

impl GraphCalendarClient {
    /// Creates a client for `config`.
    pub fn new(config: CalendarConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                ProviderError::configuration("failed to build HTTP client").with_source(e)
            })?;
        Ok(Self { config, http })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CalendarConfig {
        &self.config
    }

    /// Fetches every page of `{api_base}{owner}/calendarView` for `range`.
    async fn calendar_view(
        &self,
        token: &AccessToken,
        owner: &str,
        range: TimeRange,
        time_zone: &str,
    ) -> ProviderResult<Vec<Event>> {
        if !is_valid_time_zone(time_zone) {
            return Err(ProviderError::configuration(format!(
                "invalid time zone name {:?}",
                time_zone
            )));
        }
        let prefer = HeaderValue::from_str(&format!("outlook.timezone=\"{}\"", time_zone))
            .map_err(|e| ProviderError::configuration("invalid time zone header").with_source(e))?;

        let base = self.config.api_base.trim_end_matches('/');
        let first = url::Url::parse_with_params(
            &format!("{}{}/calendarView", base, owner),
            &[
                ("startDateTime", range.start_param()),
                ("endDateTime", range.end_param()),
                ("$top", self.config.page_size.to_string()),
                ("$select", SELECT_FIELDS.to_string()),
                ("$orderby", "start/dateTime".to_string()),
            ],
        )
        .map_err(|e| ProviderError::configuration(format!("invalid calendar URL: {}", e)))?;
        let origin = first.origin();

        let mut events = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;

        while let Some(page_url) = next.take() {
            if pages >= self.config.max_pages {
                warn!(pages, "calendar view page limit reached, truncating");
                break;
            }
            pages += 1;

            let page = self
                .config
                .retry
                .run("calendar_view", || self.get_page(token, &page_url, &prefer))
                .await?;

            events.extend(
                page.value
                    .into_iter()
                    .filter_map(|e| e.into_event(time_zone)),
            );

            if let Some(link) = page.next_link {
                let link = url::Url::parse(&link).map_err(|e| {
                    ProviderError::invalid_response(format!("invalid @odata.nextLink: {}", e))
                })?;
                // The bearer token must never follow a link to another host.
                if link.origin() != origin {
                    return Err(ProviderError::invalid_response(
                        "@odata.nextLink points outside the calendar API",
                    ));
                }
                next = Some(link);
            }
        }

        sort_events(&mut events);
        debug!(count = events.len(), pages, "fetched calendar view");
        Ok(events)
    }

    async fn get_page(
        &self,
        token: &AccessToken,
        url: &url::Url,
        prefer: &HeaderValue,
    ) -> ProviderResult<CalendarViewPage> {
        let response = self
            .http
            .get(url.clone())
            .bearer_auth(token.secret().expose())
            .header("Prefer", prefer.clone())
            .send()
            .await
            .map_err(|e| ProviderError::from_transport("calendar request", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from_transport("calendar response", e))?;
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response("failed to parse calendar view").with_source(e)
        })
    }
}

fn classify_api_error(status: StatusCode, body: &str) -> ProviderError {
    let api_code = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|b| b.error.code)
        .unwrap_or_default();
    let message = if api_code.is_empty() {
        format!("calendar API returned {}", status.as_u16())
    } else {
        format!("calendar API returned {} ({})", status.as_u16(), api_code)
    };

    match status {
        StatusCode::UNAUTHORIZED => ProviderError::unauthorized(message),
        StatusCode::FORBIDDEN => ProviderError::access_denied(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::transient(message),
        s if s.is_server_error() => ProviderError::transient(message),
        _ => ProviderError::invalid_response(message),
    }
}

impl CalendarFetcher for GraphCalendarClient {
    fn fetch_events_for_range<'a>(
        &'a self,
        token: &'a AccessToken,
        range: TimeRange,
        time_zone: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<Event>>> {
        Box::pin(self.calendar_view(token, "/me", range, time_zone))
    }

    fn fetch_user_events_for_range<'a>(
        &'a self,
        token: &'a AccessToken,
        user_id: &'a str,
        range: TimeRange,
        time_zone: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<Event>>> {
        Box::pin(async move {
            if user_id.trim().is_empty() {
                return Err(ProviderError::configuration("user id is required"));
            }
            let owner = format!("/users/{}", urlencoding::encode(user_id));
            self.calendar_view(token, &owner, range, time_zone).await
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: String,
}

/// One page of a `calendarView` response.
#[derive(Debug, Deserialize)]
struct CalendarViewPage {
    #[serde(default)]
    value: Vec<ApiEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    subject: Option<String>,
    start: ApiDateTime,
    end: ApiDateTime,
    #[serde(default)]
    is_all_day: bool,
    #[serde(default)]
    is_cancelled: bool,
    online_meeting: Option<ApiOnlineMeeting>,
    web_link: Option<String>,
    location: Option<ApiLocation>,
    organizer: Option<ApiRecipient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDateTime {
    date_time: String,
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiOnlineMeeting {
    join_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiLocation {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRecipient {
    email_address: Option<ApiEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct ApiEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

impl ApiDateTime {
    fn parse(&self, fallback_zone: &str) -> Option<EventTime> {
        let zone = self.time_zone.as_deref().unwrap_or(fallback_zone);
        EventTime::parse(&self.date_time, zone)
    }
}

impl ApiEvent {
    fn into_event(self, time_zone: &str) -> Option<Event> {
        if self.is_cancelled {
            return None;
        }
        let id = self.id?;
        let (Some(start), Some(end)) = (self.start.parse(time_zone), self.end.parse(time_zone))
        else {
            warn!(event_id = %id, "skipping event with unparseable times");
            return None;
        };

        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

        let mut event = Event::new(id, self.subject.unwrap_or_default(), start, end)
            .with_all_day(self.is_all_day);
        event.join_url = non_empty(self.online_meeting.and_then(|m| m.join_url));
        event.web_link = non_empty(self.web_link);
        event.location = non_empty(self.location.and_then(|l| l.display_name));
        event.organizer = non_empty(
            self.organizer
                .and_then(|o| o.email_address)
                .and_then(|a| a.name.or(a.address)),
        );
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderErrorCode;
    use crate::retry::RetryPolicy;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GraphCalendarClient {
        GraphCalendarClient::new(
            CalendarConfig::default()
                .with_api_base(format!("{}/v1.0", server.uri()))
                .with_retry(RetryPolicy::default().with_backoff(Duration::ZERO, Duration::ZERO, 1.0)),
        )
        .unwrap()
    }

    fn token() -> AccessToken {
        AccessToken::new("tok-1", Utc::now() + chrono::Duration::hours(1))
    }

    fn range() -> TimeRange {
        TimeRange::day(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap().date_naive())
    }

    fn api_event(id: &str, start: &str, end: &str) -> serde_json::Value {
        json!({
            "id": id,
            "subject": format!("Meeting {}", id),
            "start": { "dateTime": start, "timeZone": "Europe/Paris" },
            "end": { "dateTime": end, "timeZone": "Europe/Paris" },
            "isAllDay": false,
            "onlineMeeting": { "joinUrl": format!("https://teams.example/{}", id) },
            "organizer": { "emailAddress": { "name": "Ada", "address": "ada@example.com" } }
        })
    }

    #[tokio::test]
    async fn fetches_all_pages_and_sorts_by_start() {
        let server = MockServer::start().await;
        let next_link = format!("{}/v1.0/me/calendarView?$skiptoken=p2", server.uri());

        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView"))
            .and(query_param("startDateTime", "2024-03-15T00:00:00Z"))
            .and(query_param("endDateTime", "2024-03-16T00:00:00Z"))
            .and(query_param_is_missing("$skiptoken"))
            .and(header("authorization", "Bearer tok-1"))
            .and(header("prefer", "outlook.timezone=\"Europe/Paris\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [api_event("late", "2024-03-15T15:00:00.0000000", "2024-03-15T16:00:00.0000000")],
                "@odata.nextLink": next_link
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView"))
            .and(query_param("$skiptoken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [api_event("early", "2024-03-15T09:00:00.0000000", "2024-03-15T09:30:00.0000000")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let events = client(&server)
            .fetch_events_for_range(&token(), range(), "Europe/Paris")
            .await
            .unwrap();

        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(events[0].start.time_zone, "Europe/Paris");
        assert_eq!(events[0].join_url.as_deref(), Some("https://teams.example/early"));
        assert_eq!(events[0].organizer.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "code": "InvalidAuthenticationToken", "message": "expired" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_events_for_range(&token(), range(), "UTC")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::Unauthorized);
        assert!(err.message().contains("InvalidAuthenticationToken"));
    }

    #[tokio::test]
    async fn throttling_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let events = client(&server)
            .fetch_events_for_range(&token(), range(), "UTC")
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn forbidden_is_access_denied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_events_for_range(&token(), range(), "UTC")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::AccessDenied);
    }

    #[tokio::test]
    async fn foreign_next_link_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [],
                "@odata.nextLink": "https://attacker.example/steal"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_events_for_range(&token(), range(), "UTC")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::InvalidResponse);
    }

    #[tokio::test]
    async fn user_calendar_path_is_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/users/ada%40example.com/calendarView"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [api_event("1", "2024-03-15T09:00:00", "2024-03-15T10:00:00")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let events = client(&server)
            .fetch_user_events_for_range(&token(), "ada@example.com", range(), "UTC")
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn invalid_time_zone_never_reaches_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_events_for_range(&token(), range(), "UTC\"\r\nX-Evil: 1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::Configuration);
    }

    #[test]
    fn cancelled_and_malformed_events_are_skipped() {
        let page: CalendarViewPage = serde_json::from_value(json!({
            "value": [
                { "id": "c", "subject": "x", "isCancelled": true,
                  "start": { "dateTime": "2024-03-15T09:00:00" },
                  "end": { "dateTime": "2024-03-15T10:00:00" } },
                { "id": "m", "subject": "x",
                  "start": { "dateTime": "tomorrow" },
                  "end": { "dateTime": "2024-03-15T10:00:00" } },
                { "id": "ok",
                  "start": { "dateTime": "2024-03-15T09:00:00" },
                  "end": { "dateTime": "2024-03-15T10:00:00" },
                  "location": { "displayName": "" } }
            ]
        }))
        .unwrap();

        let events: Vec<_> = page.value.into_iter().filter_map(|e| e.into_event("UTC")).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "ok");
        assert_eq!(events[0].subject, "");
        assert_eq!(events[0].start.time_zone, "UTC");
        assert!(events[0].location.is_none());
    }

    #[test]
    fn time_zone_validation() {
        assert!(is_valid_time_zone("Europe/Paris"));
        assert!(is_valid_time_zone("Pacific Standard Time"));
        assert!(is_valid_time_zone("Etc/GMT+2"));
        assert!(!is_valid_time_zone(""));
        assert!(!is_valid_time_zone("UTC\""));
    }
}
