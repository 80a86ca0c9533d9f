use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use citabot_core::config::CalendarConfig;
use citabot_core::interval::TimeSlot;

use crate::types::{BusyInterval, EventDraft, EventPatch, EventRef};
use crate::{CalendarClient, CalendarError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Calendar client over a Google-Calendar-v3-shaped REST API. Every call
/// carries a bounded timeout; transient failures (transport, 429, 5xx) are
/// retried with exponential backoff before surfacing.
pub struct HttpCalendarClient {
    http: reqwest::Client,
    base_url: String,
    api_token: SecretString,
    timezone: String,
    retry: RetryPolicy,
}

impl HttpCalendarClient {
    pub fn from_config(config: &CalendarConfig) -> Result<Self, CalendarError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| CalendarError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            timezone: config.timezone.clone(),
            retry: RetryPolicy { max_retries: config.max_retries, ..RetryPolicy::default() },
        })
    }

    async fn send_with_retry(
        &self,
        operation: &'static str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, CalendarError> {
        let mut attempt = 0u32;
        loop {
            let error = match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let code = status.as_u16();
                    let message = response.text().await.unwrap_or_default();
                    if code == 404 || code == 410 {
                        CalendarError::NotFound(message)
                    } else {
                        CalendarError::Status { status: code, message }
                    }
                }
                Err(error) => CalendarError::Transport(error.to_string()),
            };

            if error.is_transient() && attempt < self.retry.max_retries {
                warn!(
                    operation,
                    attempt,
                    max_retries = self.retry.max_retries,
                    error = %error,
                    "calendar call failed; retrying with backoff"
                );
                tokio::time::sleep(self.retry.backoff(attempt)).await;
                attempt += 1;
                continue;
            }

            return Err(error);
        }
    }

    fn wire_datetime(&self, value: DateTime<Utc>) -> WireDateTime<'_> {
        WireDateTime {
            date_time: value.to_rfc3339_opts(SecondsFormat::Secs, true),
            time_zone: &self.timezone,
        }
    }
}

#[async_trait]
impl CalendarClient for HttpCalendarClient {
    async fn query_freebusy(
        &self,
        calendar_id: &str,
        window: &TimeSlot,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        let url = format!("{}/freeBusy", self.base_url);
        let body = FreeBusyRequest {
            time_min: window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            time_max: window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            time_zone: &self.timezone,
            items: vec![FreeBusyItem { id: calendar_id }],
        };

        let response = self
            .send_with_retry("freebusy", || {
                self.http
                    .post(&url)
                    .bearer_auth(self.api_token.expose_secret())
                    .json(&body)
            })
            .await?;

        let payload: FreeBusyResponse = response
            .json()
            .await
            .map_err(|error| CalendarError::Decode(error.to_string()))?;

        let mut busy = Vec::new();
        for calendar in payload.calendars.into_values() {
            for period in calendar.busy {
                busy.push(parse_busy_period(&period)?);
            }
        }
        busy.sort_by_key(|interval| interval.start);
        Ok(busy)
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        draft: &EventDraft,
    ) -> Result<EventRef, CalendarError> {
        let url = format!("{}/calendars/{}/events", self.base_url, calendar_id);
        let body = EventBody {
            summary: Some(&draft.summary),
            description: Some(&draft.description),
            start: Some(self.wire_datetime(draft.slot.start)),
            end: Some(self.wire_datetime(draft.slot.end)),
        };

        let response = self
            .send_with_retry("create_event", || {
                self.http
                    .post(&url)
                    .bearer_auth(self.api_token.expose_secret())
                    .json(&body)
            })
            .await?;

        let created: CreatedEvent = response
            .json()
            .await
            .map_err(|error| CalendarError::Decode(error.to_string()))?;
        Ok(EventRef(created.id))
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_ref: &EventRef,
        patch: &EventPatch,
    ) -> Result<(), CalendarError> {
        let url =
            format!("{}/calendars/{}/events/{}", self.base_url, calendar_id, event_ref.0);
        let body = EventBody {
            summary: patch.summary.as_deref(),
            description: patch.description.as_deref(),
            start: patch.slot.map(|slot| self.wire_datetime(slot.start)),
            end: patch.slot.map(|slot| self.wire_datetime(slot.end)),
        };

        self.send_with_retry("update_event", || {
            self.http
                .patch(&url)
                .bearer_auth(self.api_token.expose_secret())
                .json(&body)
        })
        .await?;

        Ok(())
    }

    async fn delete_event(
        &self,
        calendar_id: &str,
        event_ref: &EventRef,
    ) -> Result<(), CalendarError> {
        let url =
            format!("{}/calendars/{}/events/{}", self.base_url, calendar_id, event_ref.0);

        let result = self
            .send_with_retry("delete_event", || {
                self.http.delete(&url).bearer_auth(self.api_token.expose_secret())
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            // Deleting an already-deleted event is a success for our caller.
            Err(CalendarError::NotFound(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeBusyRequest<'a> {
    time_min: String,
    time_max: String,
    time_zone: &'a str,
    items: Vec<FreeBusyItem<'a>>,
}

#[derive(Serialize)]
struct FreeBusyItem<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: HashMap<String, FreeBusyCalendar>,
}

#[derive(Default, Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<WirePeriod>,
}

#[derive(Deserialize)]
struct WirePeriod {
    start: String,
    end: String,
}

#[derive(Serialize)]
struct EventBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<WireDateTime<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<WireDateTime<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireDateTime<'a> {
    date_time: String,
    time_zone: &'a str,
}

#[derive(Deserialize)]
struct CreatedEvent {
    id: String,
}

fn parse_busy_period(period: &WirePeriod) -> Result<BusyInterval, CalendarError> {
    let start = DateTime::parse_from_rfc3339(&period.start)
        .map_err(|error| CalendarError::Decode(format!("bad busy start `{}`: {error}", period.start)))?
        .with_timezone(&Utc);
    let end = DateTime::parse_from_rfc3339(&period.end)
        .map_err(|error| CalendarError::Decode(format!("bad busy end `{}`: {error}", period.end)))?
        .with_timezone(&Utc);
    Ok(BusyInterval { start, end })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{FreeBusyResponse, RetryPolicy, WireDateTime};

    #[test]
    fn backoff_doubles_and_clamps() {
        let policy = RetryPolicy { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 };
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(10), Duration::from_millis(5_000));
    }

    #[test]
    fn freebusy_response_tolerates_missing_sections() {
        let payload: FreeBusyResponse = serde_json::from_str("{}").expect("parse empty");
        assert!(payload.calendars.is_empty());

        let payload: FreeBusyResponse = serde_json::from_str(
            r#"{
                "calendars": {
                    "primary": {
                        "busy": [
                            {"start": "2026-04-20T16:00:00Z", "end": "2026-04-20T17:00:00Z"}
                        ]
                    },
                    "empty": {}
                }
            }"#,
        )
        .expect("parse populated");
        assert_eq!(payload.calendars.len(), 2);
        assert_eq!(payload.calendars["primary"].busy.len(), 1);
        assert!(payload.calendars["empty"].busy.is_empty());
    }

    #[test]
    fn event_body_serializes_times_with_timezone() {
        let wire = WireDateTime {
            date_time: "2026-04-20T16:00:00Z".to_string(),
            time_zone: "America/Mexico_City",
        };
        let json = serde_json::to_value(&wire).expect("serialize");
        assert_eq!(json["dateTime"], "2026-04-20T16:00:00Z");
        assert_eq!(json["timeZone"], "America/Mexico_City");
    }
}
